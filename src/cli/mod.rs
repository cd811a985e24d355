//! Shared helpers for the binaries: argv parsing and terminal rendering of results.

use serde_json::Value;

use crate::boundary::BoundaryView;
use crate::config::{parse_bool, AccessConfig};
use crate::reporter::DiagnosticEntry;

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Value following `flag`, if both are present.
pub fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

pub fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    flag_value(args, flag).and_then(|v| v.parse::<u16>().ok())
}

/// Positional arguments: everything that is neither a flag nor a flag's value.
/// `value_flags` lists the flags that consume the following token.
pub fn positionals(args: &[String], value_flags: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if value_flags.contains(&a.as_str()) {
            i += 2;
            continue;
        }
        if !a.starts_with('-') {
            out.push(a.clone());
        }
        i += 1;
    }
    out
}

/// Overlay the connection flags shared by the binaries onto `cfg`.
pub fn apply_cli_flags(cfg: &mut AccessConfig, args: &[String]) -> anyhow::Result<()> {
    if let Some(v) = flag_value(args, "--api") { cfg.api_base_url = v; }
    if let Some(v) = flag_value(args, "--identity") { cfg.identity_base_url = v; }
    if let Some(v) = flag_value(args, "--session-file") { cfg.session_file = Some(v.into()); }
    if let Some(v) = flag_value(args, "--diagnostics-dir") { cfg.diagnostics_dir = Some(v.into()); }
    if let Some(v) = flag_value(args, "--logging-endpoint") { cfg.logging_endpoint = v; }
    if let Some(v) = flag_value(args, "--remote-logging") {
        cfg.remote_logging_enabled =
            parse_bool(&v).ok_or_else(|| anyhow::anyhow!("--remote-logging expects a boolean, got '{}'", v))?;
    }
    if has_flag(args, "--no-remote-logging") { cfg.remote_logging_enabled = false; }
    Ok(())
}

/// Print a boundary view for the terminal. Returns the process exit code.
pub fn print_view(view: &BoundaryView<Value>) -> i32 {
    match view {
        BoundaryView::Content { data } => {
            if !print_items_table(data) {
                println!("{}", serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()));
            }
            0
        }
        BoundaryView::Login { return_to, .. } => {
            eprintln!("Not signed in (or the session ended). Run `login` and retry {}.", return_to);
            2
        }
        BoundaryView::Denied { message } => {
            eprintln!("Not permitted: {}", message);
            3
        }
        BoundaryView::Fallback(fb) => {
            eprintln!("{}\n{}", fb.title, fb.detail);
            eprintln!("Retry the command, or start again from {}.", fb.home_path);
            4
        }
    }
}

pub fn print_diagnostic(entry: Option<&DiagnosticEntry>) {
    match entry {
        Some(e) => println!("last client error at {}\n  url: {}\n  message: {}", e.timestamp, e.url, e.message),
        None => println!("no client error recorded"),
    }
}

/// Render `{"items": [...]}` (or a bare array of objects) as an ASCII table.
/// Returns false when the payload has no tabular shape.
pub fn print_items_table(val: &Value) -> bool {
    let Some((cols, rows)) = tabulate(val) else { return false };
    let max_col_width: usize = 60;
    let mut widths: Vec<usize> = cols.iter().map(|c| c.chars().count().min(max_col_width)).collect();
    for r in &rows {
        for (i, cell) in r.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count().min(max_col_width));
        }
    }
    let sep = build_separator(&widths);
    println!("{}", sep);
    println!("{}", build_row(&cols, &widths));
    println!("{}", sep);
    for r in &rows {
        println!("{}", build_row(r, &widths));
    }
    println!("{}", sep);
    println!("rows: {}", rows.len());
    true
}

/// Column names (sorted union of object keys) and stringified rows.
fn tabulate(val: &Value) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let arr = match val {
        Value::Array(a) => a,
        other => other.get("items")?.as_array()?,
    };
    if arr.is_empty() || !arr.iter().all(Value::is_object) {
        return None;
    }
    let mut cols: Vec<String> = Vec::new();
    for el in arr.iter().filter_map(Value::as_object) {
        for k in el.keys() {
            if !cols.contains(k) { cols.push(k.clone()); }
        }
    }
    cols.sort();
    let rows = arr
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| cols.iter().map(|c| obj.get(c).map(to_cell_string).unwrap_or_default()).collect())
        .collect();
    Some((cols, rows))
}

fn to_cell_string(v: &Value) -> String {
    match v {
        Value::Null => String::from("NULL"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let text = truncate(cells.get(i).map(String::as_str).unwrap_or(""), *w);
        let pad = w.saturating_sub(text.chars().count());
        s.push(' ');
        if is_numeric_like(&text) {
            s.push_str(&" ".repeat(pad));
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&" ".repeat(pad));
        }
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    !st.is_empty() && st.chars().any(|c| c.is_ascii_digit()) && st.chars().all(|c| c.is_ascii_digit() || ".-+eE,_".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flag_parsing() {
        let a = args(&["collegium_cli", "call", "GET", "/api/fees", "--api", "http://h:1", "--remote-logging", "on"]);
        assert_eq!(flag_value(&a, "--api").as_deref(), Some("http://h:1"));
        assert!(flag_value(&a, "--identity").is_none());
        assert_eq!(positionals(&a[1..], &["--api", "--remote-logging"]), vec!["call", "GET", "/api/fees"]);
        let mut cfg = AccessConfig::default();
        apply_cli_flags(&mut cfg, &a).unwrap();
        assert_eq!(cfg.api_base_url, "http://h:1");
        assert!(cfg.remote_logging_enabled);
        assert!(apply_cli_flags(&mut cfg, &args(&["--remote-logging", "maybe"])).is_err());
    }

    #[test]
    fn port_arg() {
        assert_eq!(parse_port_arg(&args(&["--port", "8080"]), "--port"), Some(8080));
        assert_eq!(parse_port_arg(&args(&["--port", "x"]), "--port"), None);
    }

    #[test]
    fn tabulates_items() {
        let (cols, rows) = tabulate(&json!({"items": [{"id": 1, "name": "Asha"}, {"id": 2}]})).unwrap();
        assert_eq!(cols, vec!["id", "name"]);
        assert_eq!(rows[1], vec!["2".to_string(), String::new()]);
        assert!(tabulate(&json!({"items": []})).is_none());
        assert!(tabulate(&json!({"status": "ok"})).is_none());
    }

    #[test]
    fn row_alignment() {
        let row = build_row(&["12".to_string(), "ab".to_string()], &[4, 4]);
        assert_eq!(row, "|   12 | ab   |");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
