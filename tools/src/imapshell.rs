extern crate lilmail;

use std::{path::Path, str::FromStr};

use lilmail::{
    conf::AccountSettings,
    error::{Error, ErrorKind},
    imap::ImapSession,
    search::{self, SearchField, SearchQuery},
    Flag, ImapServerConf, Result, StderrLogger,
};

/// Opens an IMAP session with the settings of an account file, runs one
/// command and prints its result as JSON.
///
/// # Example invocation:
/// ```sh
/// ./imapshell account.toml folders
/// ./imapshell account.toml page INBOX 1 20
/// ./imapshell account.toml move INBOX Archive 4711
/// ```
///
/// See the `conf` module of `lilmail` for the account file format.
const USAGE: &str = "Usage: imapshell ACCOUNT.toml COMMAND [ARGS..]

Commands:
  folders
  select FOLDER
  page FOLDER PAGE PAGE_SIZE
  get FOLDER ID
  recent FOLDER LIMIT
  threads FOLDER LIMIT
  search FOLDER TEXT [FIELD] [PAGE] [PAGE_SIZE]
  attachment FOLDER ID INDEX OUTPUT_PATH
  read FOLDER ID
  unread FOLDER ID
  flag FOLDER ID (seen|answered|flagged|deleted|draft) (on|off)
  delete FOLDER ID
  move FOLDER TARGET ID
  mkdir NAME
  rmdir NAME
  rename FROM TO";

fn usage() -> ! {
    eprintln!("{}", USAGE);
    std::process::exit(1);
}

fn number(s: &str) -> Result<usize> {
    usize::from_str(s).map_err(|err| {
        Error::new(format!("`{}` is not a number", s))
            .set_details(err.to_string())
            .set_kind(ErrorKind::Validation)
    })
}

fn flag(s: &str) -> Result<Flag> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "seen" => Flag::SEEN,
        "answered" => Flag::REPLIED,
        "flagged" => Flag::FLAGGED,
        "deleted" => Flag::TRASHED,
        "draft" => Flag::DRAFT,
        other => {
            return Err(Error::new(format!("Unknown flag `{}`", other))
                .set_kind(ErrorKind::Validation))
        }
    })
}

fn print<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(session: &mut ImapSession, command: &str, args: &[&str]) -> Result<()> {
    match (command, args) {
        ("folders", []) => {
            let folders = session.list_folders()?.collect::<Result<Vec<_>>>()?;
            print(&folders)
        }
        ("select", [folder]) => print(&session.select_folder(folder, true)?),
        ("page", [folder, page, page_size]) => {
            print(&session.fetch_page(folder, number(page)?, number(page_size)?)?)
        }
        ("get", [folder, id]) => print(&session.fetch_by_id(folder, id)?),
        ("recent", [folder, limit]) => print(&session.fetch_recent(folder, number(limit)?)?),
        ("threads", [folder, limit]) => print(&session.fetch_threads(folder, number(limit)?)?),
        ("search", [folder, text, rest @ ..]) if rest.len() <= 3 => {
            let field = rest
                .first()
                .map(|f| SearchField::from_str(f))
                .transpose()?
                .unwrap_or_default();
            let page = rest.get(1).map(|p| number(p)).transpose()?.unwrap_or(1);
            let page_size = rest.get(2).map(|p| number(p)).transpose()?.unwrap_or(20);
            let matches = session.search(folder, &SearchQuery::new(*text, field), 500)?;
            print(&search::paginate(matches, page, page_size)?)
        }
        ("attachment", [folder, id, index, output]) => {
            let attachment = session.fetch_attachment(folder, id, number(index)?)?;
            std::fs::write(Path::new(output), &attachment.content)?;
            println!(
                "Wrote {} ({}, {} bytes) to {}",
                attachment.filename, attachment.content_type, attachment.size, output
            );
            Ok(())
        }
        ("read", [folder, id]) => session.mark_read(folder, id),
        ("unread", [folder, id]) => session.mark_unread(folder, id),
        ("flag", [folder, id, name, state]) => {
            session.set_flag(folder, id, flag(name)?, *state == "on")
        }
        ("delete", [folder, id]) => session.delete(folder, id),
        ("move", [folder, target, id]) => session.move_message(folder, target, id),
        ("mkdir", [name]) => session.create_folder(name),
        ("rmdir", [name]) => session.delete_folder(name),
        ("rename", [from, to]) => session.rename_folder(from, to),
        _ => usage(),
    }
}

fn main() -> Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    if args.len() < 2 {
        usage();
    }
    let settings = AccountSettings::from_path(Path::new(&args[0]))?;
    let logger = StderrLogger::new(settings.log_level);
    log::debug!("logging at {}", logger.log_level());

    let conf = ImapServerConf::try_from(&settings)?;
    let mut session = ImapSession::open(conf)?;
    let rest = args[2..].iter().map(String::as_str).collect::<Vec<&str>>();
    let result = run(&mut session, &args[1], &rest);
    session.close();
    if let Err(ref err) = result {
        eprintln!("{}", err);
        if let Some(details) = err.details.as_ref() {
            eprintln!("{}", details);
        }
        std::process::exit(if err.kind.is_recoverable() { 2 } else { 1 });
    }
    Ok(())
}
