//! ASCII art banner for interactive mode.

use std::io::IsTerminal;

/// ANSI true-color escape sequences for the banner palette.
struct Colors {
    wire: &'static str,
    node: &'static str,
    title: &'static str,
    subtitle: &'static str,
    reset: &'static str,
}

const COLOR: Colors = Colors {
    wire: "\x1b[38;2;90;130;139m",
    node: "\x1b[38;2;120;190;200m",
    title: "\x1b[1;38;2;120;200;210m",
    subtitle: "\x1b[38;2;100;100;120m",
    reset: "\x1b[0m",
};

const PLAIN: Colors = Colors { wire: "", node: "", title: "", subtitle: "", reset: "" };

/// Prints the banner to stdout.
///
/// Renders ANSI true-color when stdout is a terminal, falls back to plain
/// text otherwise.
pub fn print_banner() {
    let c = if std::io::stdout().is_terminal() { &COLOR } else { &PLAIN };

    let w = c.wire;
    let n = c.node;
    let tt = c.title;
    let st = c.subtitle;
    let r = c.reset;

    println!(
        r#"
{n}   o{w}---{n}o{w}---{n}o{r}          {tt} ____        _             _     {r}
{w}   |    {n}o{w}    |{r}          {tt}|  _ \ _   _| |__  ___ _   _| |__  {r}
{n}   o{w}---{n}o{w}---{n}o{r}          {tt}| |_) | | | | '_ \/ __| | | | '_ \ {r}
{w}        |{r}                 {tt}|  __/| |_| | |_) \__ \ |_| | |_) |{r}
{n}        o{r}                 {tt}|_|    \__,_|_.__/|___/\__,_|_.__/ {r}

{st}               a client for the bus.{r}
"#
    );
}
