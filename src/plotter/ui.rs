const BANNER_WIDTH: usize = 72;
const KEY_WIDTH: usize = 14;

pub fn startup_banner(title: &str, lines: &[(&str, String)]) {
    let border = "=".repeat(BANNER_WIDTH);
    println!();
    println!("{border}");
    println!("{:^width$}", title, width = BANNER_WIDTH);
    println!("{border}");
    for (key, value) in lines {
        println!(
            "  {:<key_width$} {}",
            format!("{key}:"),
            value,
            key_width = KEY_WIDTH
        );
    }
    println!("{border}");
    println!();
}

pub fn info(tag: &str, message: impl AsRef<str>) {
    println!("{} {}", prefix("INFO", tag), message.as_ref());
}

pub fn success(tag: &str, message: impl AsRef<str>) {
    println!("{} {}", prefix(" OK ", tag), message.as_ref());
}

pub fn warn(tag: &str, message: impl AsRef<str>) {
    eprintln!("{} {}", prefix("WARN", tag), message.as_ref());
}

pub fn error(tag: &str, message: impl AsRef<str>) {
    eprintln!("{} {}", prefix("ERR ", tag), message.as_ref());
}

fn prefix(level: &str, tag: &str) -> String {
    format!("[{level}][{tag:<8}]")
}

/// "1w 2d 3h 4m 5s", dropping leading zero components.
pub fn format_duration(total_secs: u64) -> String {
    const STEPS: &[(u64, &str)] = &[(604_800, "w"), (86_400, "d"), (3600, "h"), (60, "m")];

    let mut out = String::new();
    let mut rest = total_secs;
    for &(span, label) in STEPS {
        if rest >= span {
            out.push_str(&format!("{}{label} ", rest / span));
            rest %= span;
        }
    }
    out.push_str(&format!("{rest}s"));
    out
}

/// Mebibyte count folded into the closest of MB/GB/TB.
pub fn format_mib(mib: u64) -> String {
    const UNITS: &[&str] = &["MB", "GB", "TB"];

    let mut value = mib as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
