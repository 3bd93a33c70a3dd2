use indicatif::ProgressStyle;
use indicatif::style::TemplateError;

/// Progress bar style for the whole run.
pub(crate) fn style_run_bar() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

/// Spinner style for an individual task.
pub(crate) fn style_task() -> Result<ProgressStyle, TemplateError> {
    ProgressStyle::default_spinner().template("{spinner:.green} {msg}")
}

/// Installs a global tracing subscriber with progress bar support.
///
/// Respects `RUST_LOG`, defaulting to `info`. Log lines are written above
/// the live progress bars instead of clobbering them. Call once, before the
/// first [`TaskFlow::execute`](crate::TaskFlow::execute); later calls fail
/// because the global subscriber is already set.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styles_are_valid_templates() {
        assert!(style_run_bar().is_ok());
        assert!(style_task().is_ok());
    }
}
