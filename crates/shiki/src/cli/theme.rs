//! Prompt styling for the interactive review and labeling loops.

use console::{style, Style};
use dialoguer::theme::ColorfulTheme;

/// Stderr-only theme, so stdout stays clean for piped data.
pub fn shiki_theme() -> ColorfulTheme {
    let accent = Style::new().for_stderr().magenta();
    let muted = Style::new().for_stderr().dim();
    ColorfulTheme {
        prompt_prefix: style("◆".to_string()).for_stderr().magenta(),
        prompt_suffix: style("→".to_string()).for_stderr().dim(),
        active_item_prefix: style("»".to_string()).for_stderr().magenta().bold(),
        inactive_item_prefix: style(" ".to_string()).for_stderr(),
        active_item_style: accent.clone().bold(),
        inactive_item_style: muted.clone(),
        success_prefix: style("◇".to_string()).for_stderr().green(),
        success_suffix: style("→".to_string()).for_stderr().dim(),
        values_style: accent,
        hint_style: muted,
        ..ColorfulTheme::default()
    }
}

/// Bold section title with a blank line either side.
pub fn heading(text: &str) {
    eprintln!();
    eprintln!("  {}", Style::new().for_stderr().magenta().bold().apply_to(text));
    eprintln!();
}
