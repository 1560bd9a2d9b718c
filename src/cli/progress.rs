use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Spinner counting input bytes, attached to the shared progress display.
pub fn create_spinner(multi: &MultiProgress, message: &'static str) -> Result<ProgressBar> {
    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} {bytes} read ({bytes_per_sec})\n{msg} | elapsed: {elapsed_precise}",
    )?);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(message);
    Ok(pb)
}

pub fn spinner_for(multi: Option<&MultiProgress>, message: &'static str) -> Result<Option<ProgressBar>> {
    multi.map(|m| create_spinner(m, message)).transpose()
}
