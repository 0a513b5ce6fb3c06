// Line-oriented command interface over a `Store`.

use thiserror::Error;

use crate::{
    error::{status_message, Error},
    fs::DbDir,
    store::Store,
};

pub const HELP: &str = "Available commands:
  set <key> <value>  - Set a key-value pair
  get <key>          - Get value for a key
  delete <key>       - Delete a key-value pair
  list               - List all key-value pairs
  stats              - Show store statistics
  save [filename]    - Save store to file
  load [filename]    - Load store from file
  clear              - Clear all entries
  help               - Show this help message
  quit               - Exit the program";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: i32, value: String },
    Get(i32),
    Delete(i32),
    List,
    Stats,
    Save(Option<String>),
    Load(Option<String>),
    Clear,
    Help,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing key. Usage: {0}")]
    MissingKey(&'static str),
    #[error("Invalid key. Key must be an integer.")]
    InvalidKey,
    #[error("Missing value. Usage: set <key> <value>")]
    MissingValue,
    #[error("Value too long (max {0} characters).")]
    ValueTooLong(usize),
    #[error("Unknown command: {0} (type 'help' for available commands)")]
    Unknown(String),
}

fn parse_key(arg: &str, usage: &'static str) -> Result<i32, ParseError> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err(ParseError::MissingKey(usage));
    }
    arg.parse().map_err(|_| ParseError::InvalidKey)
}

fn parse_filename(arg: &str) -> Option<String> {
    let arg = arg.trim();
    if arg.is_empty() {
        None
    } else {
        Some(arg.to_owned())
    }
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str, max_value_len: usize) -> Result<Option<Command>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (name, args) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));

        let command = match name {
            "set" => {
                let args = args.trim_start();
                let (key, value) = args
                    .split_once(char::is_whitespace)
                    .unwrap_or((args, ""));
                let key = parse_key(key, "set <key> <value>")?;
                let value = value.trim();
                if value.is_empty() {
                    return Err(ParseError::MissingValue);
                }
                if value.len() > max_value_len {
                    return Err(ParseError::ValueTooLong(max_value_len));
                }
                Command::Set {
                    key,
                    value: value.to_owned(),
                }
            }
            "get" => Command::Get(parse_key(args, "get <key>")?),
            "delete" | "del" => Command::Delete(parse_key(args, "delete <key>")?),
            "list" | "ls" => Command::List,
            "stats" => Command::Stats,
            "save" => Command::Save(parse_filename(args)),
            "load" => Command::Load(parse_filename(args)),
            "clear" => Command::Clear,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(ParseError::Unknown(other.to_owned())),
        };
        Ok(Some(command))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub output: String,
    pub quit: bool,
}

impl Outcome {
    fn text(output: String) -> Self {
        Outcome {
            output,
            quit: false,
        }
    }
}

pub struct Shell<D>
where
    D: DbDir,
{
    store: Store<D>,
}

impl<D> Shell<D>
where
    D: DbDir,
{
    pub fn new(store: Store<D>) -> Self {
        Shell { store }
    }

    pub fn store_mut(&mut self) -> &mut Store<D> {
        &mut self.store
    }

    pub fn run_line(&mut self, line: &str) -> Outcome {
        match Command::parse(line, self.store.config().max_value_len) {
            Ok(None) => Outcome::default(),
            Ok(Some(command)) => self.execute(command),
            Err(e) => Outcome::text(format!("Error: {}", e)),
        }
    }

    pub fn execute(&mut self, command: Command) -> Outcome {
        let output = match command {
            Command::Set { key, value } => {
                let result = self.store.set(key, &value);
                match result {
                    Ok(()) => format!("Set: {} = \"{}\"", key, value),
                    Err(_) => format!(
                        "Error: Failed to set key-value pair: {}",
                        status_message(&result)
                    ),
                }
            }
            Command::Get(key) => match self.store.get(key) {
                Ok(Some(value)) => format!("Get: {} = \"{}\"", key, value),
                Ok(None) => format!("Key {} not found.", key),
                Err(e) => format!("Error: {}", e.kind()),
            },
            Command::Delete(key) => match self.store.delete(key) {
                Ok(_) => format!("Deleted key: {}", key),
                Err(Error::KeyNotFound(_)) => format!("Key {} not found.", key),
                Err(e) => format!("Error: {}", e.kind()),
            },
            Command::List => self.list(),
            Command::Stats => self.store.stats().to_string(),
            Command::Save(name) => {
                let name = name.unwrap_or_else(|| self.store.config().data_file.clone());
                let result = self.store.save(&name);
                match result {
                    Ok(n) => format!("Saved {} entries to '{}'", n, name),
                    Err(_) => format!("Error: Failed to save to file: {}", status_message(&result)),
                }
            }
            Command::Load(name) => {
                let name = name.unwrap_or_else(|| self.store.config().data_file.clone());
                if !self.store.exists(&name) {
                    format!("Error: File '{}' does not exist.", name)
                } else {
                    let result = self.store.load(&name);
                    match result {
                        Ok(_) => format!("Loaded {} entries from '{}'", self.store.count(), name),
                        Err(_) => format!(
                            "Error: Failed to load from file: {}",
                            status_message(&result)
                        ),
                    }
                }
            }
            Command::Clear => format!("Cleared {} entries", self.store.clear()),
            Command::Help => HELP.to_owned(),
            Command::Quit => {
                return Outcome {
                    output: String::new(),
                    quit: true,
                }
            }
        };
        Outcome::text(output)
    }

    // Entries are shown sorted by key rather than in slot order.
    fn list(&self) -> String {
        if self.store.count() == 0 {
            return "Key-value store is empty".to_owned();
        }
        let mut entries: Vec<_> = self.store.entries().collect();
        entries.sort_unstable_by_key(|(k, _)| *k);

        let mut out = format!("Key-value store contents ({} entries):", entries.len());
        for (k, v) in entries {
            out.push_str(&format!("\n  {}: \"{}\"", k, v));
        }
        out
    }
}
