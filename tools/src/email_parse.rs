extern crate lilmail;
use lilmail::{LogLevel, Message, RawMessage, Result, StderrLogger};

/// Decodes e-mail from files and prints the resulting `Message` as JSON
///
/// # Example invocation
/// ```sh
/// ./emailparse /path/to/email [/path/to/email2 /path/to/email3 ..]"
/// ```
fn main() -> Result<()> {
    if std::env::args().len() == 1 {
        eprintln!("Usage: ./emailparse /path/to/email [/path/to/email2 /path/to/email3 ..]");
        std::process::exit(1);
    }
    let _logger = StderrLogger::new(LogLevel::WARN);

    for i in std::env::args().skip(1) {
        println!("Path is {}", i);
        let filename = std::path::PathBuf::from(&i);

        if filename.exists() && filename.is_file() {
            let buffer = std::fs::read(&filename)?;
            let raw = RawMessage::new(filename.display().to_string(), buffer);
            match Message::decode(&raw) {
                Ok(message) => println!("{}", serde_json::to_string_pretty(&message)?),
                Err(err) => println!("Could not decode {}: {}", i, err),
            }
        } else {
            println!("{} is not a valid file.", i);
        }
    }
    Ok(())
}
