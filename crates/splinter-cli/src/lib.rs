//! Shared command table, dispatch, and session state for `splinter_cli`
//! (the interactive REPL) and `splinterctl` (the non-interactive, single
//! command invocation). Both binaries are thin wrappers around [`run`].

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use regex::Regex;
use splinter_config::CliConfig;
use splinter_core::{Error as StoreError, Store};

pub const EXIT_OK: i32 = 0;
pub const EXIT_USER_ERROR: i32 = 1;
pub const EXIT_IO_ERROR: i32 = 2;
pub const EXIT_NOT_IMPLEMENTED: i32 = 254;

/// How the binary was invoked, decided from `argv[0]`'s basename (the
/// original's `select_mode()` does the same `basename(argv0)` check so that
/// a renamed or hardlinked copy of the executable still picks the right
/// mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Repl,
    NonRepl,
}

pub fn select_mode(argv0: &str) -> Mode {
    let prog = std::path::Path::new(argv0)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if prog.starts_with("splinterctl") {
        Mode::NonRepl
    } else {
        Mode::Repl
    }
}

#[derive(Parser, Debug)]
#[command(name = "splinter", version, about = "Splinter shared-memory key-value bus shell")]
pub struct Cli {
    /// Store to connect to at startup (defaults to the configured bus).
    #[arg(short, long, global = true)]
    pub bus: Option<String>,

    /// Path to a TOML config file overriding compiled-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// One line of REPL input, reusing the same subcommand table as [`Cli`].
#[derive(Parser, Debug)]
#[command(name = "splinter", no_binary_name = true)]
struct ReplLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show available commands.
    Help,
    /// Connect to a different store.
    Use { name: String },
    /// Create a store (defaults to compiled-in geometry if omitted).
    Init {
        name: Option<String>,
        #[arg(long)]
        slots: Option<u32>,
        #[arg(long)]
        maxlen: Option<u32>,
    },
    /// Set a key's value.
    Set { key: String, value: String },
    /// Get a key's value.
    Get { key: String },
    /// Remove a key.
    Unset { key: String },
    /// List keys, optionally filtered by a regex pattern.
    List { pattern: Option<String> },
    /// Show a key's slot metadata.
    Head { key: String },
    /// Show store-wide or per-key configuration.
    Config { key: Option<String> },
    /// Watch a key for changes.
    Watch {
        key: String,
        #[arg(long)]
        oneshot: bool,
    },
    /// Show command history, optionally filtered by a regex pattern.
    Hist { pattern: Option<String> },
    /// Clear the terminal screen.
    Clear,
    /// Export the store's contents as JSON.
    Export { format: Option<String> },
    /// Exit the REPL.
    Exit,
    /// Alias for `exit`.
    Quit,
}

/// Per-invocation state: the currently connected store (if any), the
/// effective configuration, and (REPL only) command history.
pub struct Session {
    store: Option<Store>,
    store_name: Option<String>,
    config: CliConfig,
    history: Vec<String>,
}

impl Session {
    pub fn new(config: CliConfig) -> Self {
        Self {
            store: None,
            store_name: None,
            config,
            history: Vec::new(),
        }
    }

    fn connect(&mut self, name: &str) -> Result<(), StoreError> {
        let store = Store::open(name)?;
        self.store = Some(store);
        self.store_name = Some(name.to_string());
        Ok(())
    }

    fn store(&self) -> Result<&Store, &'static str> {
        self.store.as_ref().ok_or("not connected to a store; run 'use <name>' or 'init' first")
    }
}

/// Loads history from `SPLINTER_HISTORY_FILE` (one entry per line) when
/// `SPLINTER_HISTORY_LEN > 0`, mirroring `linenoiseHistoryLoad`.
fn load_history(config: &CliConfig) -> Vec<String> {
    if config.history_len == 0 {
        return Vec::new();
    }
    std::fs::read_to_string(&config.history_file)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Persists history to `SPLINTER_HISTORY_FILE`, truncated to
/// `SPLINTER_HISTORY_LEN` entries, mirroring `linenoiseHistorySave`.
fn save_history(config: &CliConfig, history: &[String]) {
    if config.history_len == 0 {
        return;
    }
    let start = history.len().saturating_sub(config.history_len);
    let text = history[start..].join("\n");
    if let Err(e) = std::fs::write(&config.history_file, text) {
        tracing::warn!(error = %e, "failed to persist command history");
    }
}

/// Splits a REPL line into argv-like tokens, honoring double-quoted
/// segments so `set k "multi word value"` behaves like a shell would.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point shared by both binaries.
pub fn run(mode: Mode) -> i32 {
    init_logging();

    let cli = Cli::parse();
    let config = match CliConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("splinter: failed to load config: {e}");
            return EXIT_IO_ERROR;
        }
    };

    let mut session = Session::new(config);
    session.history = load_history(&session.config);

    let bus = cli.bus.clone().unwrap_or_else(|| session.config.bus.clone());
    if let Err(e) = session.connect(&bus) {
        tracing::debug!(bus, error = %e, "no store connected at startup");
    }

    let code = match mode {
        Mode::Repl => run_repl(&mut session, cli.command),
        Mode::NonRepl => run_once(&mut session, cli.command),
    };

    save_history(&session.config, &session.history);
    code
}

fn run_once(session: &mut Session, command: Option<Command>) -> i32 {
    let Some(command) = command else {
        eprintln!("Usage: splinterctl <command> [args...]");
        eprintln!("Try 'splinterctl help' for a list of commands.");
        return EXIT_USER_ERROR;
    };
    dispatch(session, command, &mut std::io::stdout())
}

fn run_repl(session: &mut Session, startup_command: Option<Command>) -> i32 {
    eprintln!(
        "splinter_cli version {} build {}",
        env!("CARGO_PKG_VERSION"),
        "rust"
    );

    if let Some(command) = startup_command {
        dispatch(session, command, &mut std::io::stdout());
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut last_exit = EXIT_OK;

    loop {
        print!("# ");
        let _ = stdout.flush();

        let mut line = String::new();
        let bytes_read = match stdin.lock().read_line(&mut line) {
            Ok(n) => n,
            Err(_) => break,
        };
        if bytes_read == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if line.trim().is_empty() {
            continue;
        }
        session.history.push(line.clone());

        let tokens = tokenize(&line);
        match ReplLine::try_parse_from(tokens) {
            Ok(parsed) => match parsed.command {
                Command::Exit | Command::Quit => break,
                other => last_exit = dispatch(session, other, &mut stdout),
            },
            Err(e) => {
                let _ = e.print();
                last_exit = EXIT_USER_ERROR;
            }
        }
    }

    last_exit
}

fn dispatch(session: &mut Session, command: Command, out: &mut impl Write) -> i32 {
    match command {
        Command::Help => cmd_help(out),
        Command::Use { name } => cmd_use(session, &name),
        Command::Init { name, slots, maxlen } => cmd_init(session, name, slots, maxlen),
        Command::Set { key, value } => cmd_set(session, &key, &value),
        Command::Get { key } => cmd_get(session, &key, out),
        Command::Unset { key } => cmd_unset(session, &key, out),
        Command::List { pattern } => cmd_list(session, pattern.as_deref(), out),
        Command::Head { key } => cmd_head(session, &key, out),
        Command::Config { key } => cmd_config(session, key.as_deref(), out),
        Command::Watch { key, oneshot } => cmd_watch(session, &key, oneshot, out),
        Command::Hist { pattern } => cmd_hist(session, pattern.as_deref(), out),
        Command::Clear => cmd_clear(out),
        Command::Export { format } => cmd_export(session, format.as_deref(), out),
        Command::Exit | Command::Quit => EXIT_OK,
    }
}

fn cmd_help(out: &mut impl Write) -> i32 {
    let _ = writeln!(
        out,
        "Commands: help, use, init, set, get, unset, list, head, config, watch, hist, clear, export, exit"
    );
    EXIT_OK
}

fn cmd_use(session: &mut Session, name: &str) -> i32 {
    session.store = None;
    match session.connect(name) {
        Ok(()) => {
            eprintln!("use: now connected to {name}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("use: failed to connect to {name}: {e}");
            eprintln!("use: now disconnected.");
            EXIT_USER_ERROR
        }
    }
}

fn cmd_init(session: &mut Session, name: Option<String>, slots: Option<u32>, maxlen: Option<u32>) -> i32 {
    let name = name.unwrap_or_else(|| session.config.bus.clone());
    let slots = slots.unwrap_or(session.config.slots);
    let maxlen = maxlen.unwrap_or(session.config.max_val_sz);

    println!("Creating '{name}' with {slots} slots, each with a max value length of {maxlen} bytes.");

    match Store::create(&name, slots, maxlen) {
        Ok(_store) => EXIT_OK,
        Err(e) => {
            eprintln!("init: splinter_create failed: {e}");
            EXIT_IO_ERROR
        }
    }
}

fn cmd_set(session: &mut Session, key: &str, value: &str) -> i32 {
    let key = session.config.namespaced_key(key);
    let store = match session.store() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("set: {msg}");
            return EXIT_USER_ERROR;
        }
    };
    match store.set(&key, value.as_bytes()) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("set: {e}");
            exit_code_for(&e)
        }
    }
}

fn cmd_get(session: &mut Session, key: &str, out: &mut impl Write) -> i32 {
    let key = session.config.namespaced_key(key);
    let store = match session.store() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("get: {msg}");
            return EXIT_USER_ERROR;
        }
    };
    match store.get_owned(&key) {
        Ok(bytes) => {
            let _ = writeln!(out, "{} : {}", bytes.len(), String::from_utf8_lossy(&bytes));
            let _ = writeln!(out);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("get: unable to retrieve key '{key}': {e}");
            exit_code_for(&e)
        }
    }
}

fn cmd_unset(session: &mut Session, key: &str, out: &mut impl Write) -> i32 {
    let key = session.config.namespaced_key(key);
    let store = match session.store() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("unset: {msg}");
            return EXIT_USER_ERROR;
        }
    };
    match store.unset(&key) {
        Ok(len) => {
            let _ = writeln!(out, "{len} bytes deleted.");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("unset: {e}");
            exit_code_for(&e)
        }
    }
}

fn filter_regex(pattern: Option<&str>) -> Option<Regex> {
    pattern.and_then(|p| Regex::new(p).ok())
}

fn cmd_list(session: &mut Session, pattern: Option<&str>, out: &mut impl Write) -> i32 {
    let store = match session.store() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("list: {msg}");
            return EXIT_USER_ERROR;
        }
    };
    let filter = filter_regex(pattern);
    let mut snaps: Vec<_> = store
        .list()
        .into_iter()
        .filter(|k| filter.as_ref().is_none_or(|re| re.is_match(k)))
        .filter_map(|k| store.get_slot_snapshot(&k).ok())
        .collect();
    snaps.sort_by(|a, b| b.epoch.cmp(&a.epoch));

    let _ = writeln!(out, "{:<33} | {:<15} | {:<15}", "Key Name", "Epoch", "Value Length");
    let _ = writeln!(out, "{}", "-".repeat(66));
    for s in &snaps {
        let _ = writeln!(out, "{:<33} | {:<15} | {:<15}", s.key, s.epoch, s.val_len);
    }
    let _ = writeln!(out);
    EXIT_OK
}

fn cmd_head(session: &mut Session, key: &str, out: &mut impl Write) -> i32 {
    let key = session.config.namespaced_key(key);
    show_key_config(session, &key, "head", out)
}

fn cmd_config(session: &mut Session, key: Option<&str>, out: &mut impl Write) -> i32 {
    let store = match session.store() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("config: {msg}");
            return EXIT_USER_ERROR;
        }
    };
    match key {
        None => {
            let snap = store.get_header_snapshot();
            let _ = writeln!(out, "magic:       {}", snap.magic);
            let _ = writeln!(out, "version:     {}", snap.version);
            let _ = writeln!(out, "slots:       {}", snap.slots);
            let _ = writeln!(out, "max_val_sz:  {}", snap.max_val_sz);
            let _ = writeln!(out, "epoch:       {}", snap.epoch);
            let _ = writeln!(out, "auto_vacuum: {}", snap.auto_vacuum);
            let _ = writeln!(out);
            EXIT_OK
        }
        Some(key) => show_key_config(session, key, "config", out),
    }
}

fn show_key_config(session: &mut Session, key: &str, caller: &str, out: &mut impl Write) -> i32 {
    let store = match session.store() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{caller}: {msg}");
            return EXIT_USER_ERROR;
        }
    };
    match store.get_slot_snapshot(key) {
        Ok(snap) => {
            let _ = writeln!(out, "key:     {}", snap.key);
            let _ = writeln!(out, "hash:    {}", snap.hash);
            let _ = writeln!(out, "epoch:   {}", snap.epoch);
            let _ = writeln!(out, "val_off: {}", snap.val_off);
            let _ = writeln!(out, "val_len: {}", snap.val_len);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{caller}: unable to read metadata for '{key}': {e}");
            EXIT_USER_ERROR
        }
    }
}

fn cmd_watch(session: &mut Session, key: &str, oneshot: bool, out: &mut impl Write) -> i32 {
    let key = session.config.namespaced_key(key);
    loop {
        let poll_result = {
            let store = match session.store() {
                Ok(s) => s,
                Err(msg) => {
                    eprintln!("watch: {msg}");
                    return EXIT_USER_ERROR;
                }
            };
            store.poll(&key, 100)
        };
        match poll_result {
            Ok(()) => {
                let got = {
                    let store = session.store().expect("checked above");
                    store.get_owned(&key)
                };
                match got {
                    Ok(bytes) => {
                        let _ = writeln!(out, "{}:{}", bytes.len(), String::from_utf8_lossy(&bytes));
                    }
                    Err(e) => {
                        eprintln!("watch: failed to read key {key} after update: {e}");
                        return EXIT_IO_ERROR;
                    }
                }
                if oneshot {
                    let _ = writeln!(out);
                    return EXIT_OK;
                }
            }
            Err(StoreError::Timeout) => continue,
            Err(StoreError::Again) => continue,
            Err(e) => {
                eprintln!("watch: invalid key '{key}': {e}");
                return EXIT_USER_ERROR;
            }
        }
    }
}

fn cmd_hist(session: &mut Session, pattern: Option<&str>, out: &mut impl Write) -> i32 {
    let filter = filter_regex(pattern);
    for (i, line) in session.history.iter().enumerate() {
        if filter.as_ref().is_none_or(|re| re.is_match(line)) {
            let _ = writeln!(out, "{:<4}: {}", i + 1, line);
        }
    }
    let _ = writeln!(out);
    EXIT_OK
}

fn cmd_clear(out: &mut impl Write) -> i32 {
    let _ = write!(out, "\x1b[2J\x1b[H");
    let _ = out.flush();
    EXIT_OK
}

fn cmd_export(session: &mut Session, format: Option<&str>, out: &mut impl Write) -> i32 {
    if let Some(f) = format {
        if f != "json" {
            eprintln!("export: unsupported format '{f}' (only 'json' is implemented)");
            return EXIT_NOT_IMPLEMENTED;
        }
    }
    let store = match session.store() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("export: {msg}");
            return EXIT_USER_ERROR;
        }
    };
    let header = store.get_header_snapshot();
    let mut snaps: Vec<_> = store
        .list()
        .into_iter()
        .filter_map(|k| store.get_slot_snapshot(&k).ok())
        .collect();
    snaps.sort_by(|a, b| b.epoch.cmp(&a.epoch));

    let keys: Vec<_> = snaps
        .iter()
        .map(|s| {
            serde_json::json!({
                "key": s.key,
                "epoch": s.epoch,
                "value_length": s.val_len,
            })
        })
        .collect();
    let doc = serde_json::json!({
        "store": {
            "total_slots": header.slots,
            "active_keys": keys.len(),
        },
        "keys": keys,
    });
    let _ = writeln!(out, "{}", serde_json::to_string_pretty(&doc).unwrap());
    EXIT_OK
}

fn exit_code_for(e: &StoreError) -> i32 {
    match e {
        StoreError::Io(_) | StoreError::Corrupt => EXIT_IO_ERROR,
        _ => EXIT_USER_ERROR,
    }
}
