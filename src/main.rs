use anyhow::Result;
use unicode_width::UnicodeWidthChar;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if maybe_print_custom_version(&args) {
        return Ok(());
    }
    if maybe_print_custom_help(&args) {
        return Ok(());
    }
    if args.len() == 1 {
        return formsmith::cli::edit_recent();
    }
    formsmith::cli::run()
}

fn maybe_print_custom_version(args: &[String]) -> bool {
    if args.len() == 2 && matches!(args[1].as_str(), "--version" | "-V") {
        println!("formsmith {}", env!("CARGO_PKG_VERSION"));
        return true;
    }
    false
}

fn maybe_print_custom_help(args: &[String]) -> bool {
    if args.len() == 2 && matches!(args[1].as_str(), "help" | "--help" | "-h") {
        print_help_tui();
        return true;
    }
    if args.len() == 3 && matches!(args[2].as_str(), "--help" | "-h") {
        return print_subcommand_help(&args[1]);
    }
    if args.len() == 3 && args[1] == "help" {
        return print_subcommand_help(&args[2]);
    }
    false
}

const RESET: &str = "\x1b[0m";
const ACCENT2: &str = "\x1b[1;38;2;234;81;114m";

fn print_help_tui() {
    print_header();
    print_box("Usage", &[" formsmith <command> [options]", " formsmith help <command>"]);
    print_box(
        "Commands",
        &[
            " analyze        show how a schema will be rendered",
            " check-options  list options keys missing from a schema",
            " render         write the form as HTML",
            " validate       validate data files against schema + options",
            " fill           load data, apply edits, export JSON",
            " edit           interactive editor",
            " recent         show remembered schema/options files",
        ],
    );
    print_box(
        "Options",
        &[" -h, --help        show built-in help", " -V, --version     show version"],
    );
    print_box(
        "Quickstart",
        &[
            " formsmith analyze survey.schema.json",
            " formsmith render survey.schema.json --options survey.options.json --out form.html",
            " formsmith fill survey.schema.json --set site.country=CA --out data.json",
        ],
    );
    print_box(
        "Tips",
        &[
            " Editor: run `formsmith` with no arguments to reopen the last schema",
            " Logging: FORMSMITH_LOG=debug formsmith <command>",
            " Command details: formsmith <command> --help",
        ],
    );
}

fn print_subcommand_help(cmd: &str) -> bool {
    match cmd {
        "render" => {
            print_header();
            print_box(
                "Usage",
                &[" formsmith render <schema> [--options <file>] [--data <file>] [--tab <key>] [--out <file>]"],
            );
            print_box(
                "Options",
                &[
                    " --options <file>   field options and conditional rules",
                    " --data <file>      populate the form before rendering",
                    " --tab <key>        section shown first",
                    " --out <file>       write HTML here instead of stdout",
                    " --strict           reject options with unknown keys",
                ],
            );
            true
        }
        "validate" => {
            print_header();
            print_box("Usage", &[" formsmith validate <schema> <data-glob>... [--options <file>] [--strict]"]);
            print_box(
                "Notes",
                &[
                    " every matched file is loaded into a fresh form and validated",
                    " exits non-zero when any file fails",
                ],
            );
            true
        }
        "fill" => {
            print_header();
            print_box("Usage", &[" formsmith fill <schema> [--options <file>] [--data <file>] [edits] [--out <file>]"]);
            print_box(
                "Edits (applied in this order)",
                &[
                    " --select <path>=<index>   choose a oneOf/anyOf variant",
                    " --add-item <path>         append an array item",
                    " --set <path>=<value>      set a field (comma-separate multi values)",
                    " --na <path>               check the field's N/A option",
                ],
            );
            print_box(
                "Options",
                &[
                    " --force    export even when validation fails",
                    " --strict   reject options with unknown keys",
                ],
            );
            true
        }
        "edit" => {
            print_header();
            print_box("Usage", &[" formsmith edit [schema] [--options <file>] [--data <file>] [--out <file>]"]);
            print_box(
                "Keys",
                &[
                    " Tab/Shift-Tab  switch section",
                    " Enter          edit field / choose option / choose variant",
                    " N A D          N/A toggle, add item, remove item",
                    " V S            validate, save",
                ],
            );
            true
        }
        _ => false,
    }
}

fn print_header() {
    let dim = "\x1b[38;2;150;160;170m";
    let accent = "\x1b[1;38;2;0;255;255m";

    println!();
    println!(
        "{ACCENT2}FORMSMITH{RESET} {accent}Form Generator {version}{RESET}",
        version = env!("CARGO_PKG_VERSION")
    );
    println!("{}JSON Schema in, forms out{}", dim, RESET);
}

fn print_box(title: &str, lines: &[&str]) {
    let title_len = visible_len(title) + 1;
    let max_line_len = lines.iter().map(|line| visible_len(line)).max().unwrap_or(0);
    let width = usize::max(62, usize::max(title_len, max_line_len));
    println!("┌{}┐", "─".repeat(width));
    print_padded(&format!(" {ACCENT2}{title}{RESET}"), width);
    for line in lines {
        print_padded(line, width);
    }
    println!("└{}┘", "─".repeat(width));
}

fn print_padded(line: &str, width: usize) {
    let len = visible_len(line);
    let pad = width.saturating_sub(len);
    println!("│{}{}│", line, " ".repeat(pad));
}

fn visible_len(s: &str) -> usize {
    let mut len = 0;
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
            continue;
        }
        len += ch.width().unwrap_or(0);
    }
    len
}
