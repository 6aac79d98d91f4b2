extern crate lilmail;
use lilmail::{thread::build_threads, LogLevel, Message, RawMessage, Result, StderrLogger};

/// Decodes every file in a directory (for example a maildir `cur/`) and prints
/// the conversation threads they form, newest first.
///
/// # Example invocation
/// ```sh
/// ./threads /path/to/dir [--json]
/// ```
fn main() -> Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    let Some(dir) = args.first() else {
        eprintln!("Usage: ./threads /path/to/dir [--json]");
        std::process::exit(1);
    };
    let json = args.iter().any(|a| a == "--json");
    let _logger = StderrLogger::new(LogLevel::WARN);

    let mut paths = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
    paths.sort();

    let mut messages = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = RawMessage::new(path.display().to_string(), std::fs::read(&path)?);
        match Message::decode(&raw) {
            Ok(m) => messages.push(m),
            Err(err) => log::warn!("Skipping {}: {}", path.display(), err),
        }
    }
    let total = messages.len();
    let threads = build_threads(messages);
    if json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }
    println!("{} messages in {} threads", total, threads.len());
    for t in threads {
        println!(
            "{} {:>3} {} {}",
            if t.unread { "*" } else { " " },
            t.message_count,
            t.id,
            t.subject
        );
        for m in &t.messages {
            println!("        {} {}", m.message_id, m.subject);
        }
    }
    Ok(())
}
