use indicatif::{ProgressBar, ProgressStyle};

/// A bar in the house style, counting `unit`s.
pub fn bar(len: usize, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let template = format!(
        "[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {} ({{eta}} remaining) {{msg}}",
        unit
    );
    let style = ProgressStyle::default_bar()
        .template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb
}
