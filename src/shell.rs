use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::api::UserApi;
use crate::cryptor::Cryptor;
use crate::error::KeeperError;
use crate::local_store::LocalStore;
use crate::record::{
    CardDetails, CredentialPair, FilePayload, ListFilters, NoteText, Pagination, RecordBody,
    RecordKind,
};
use crate::session::ClientSession;
use crate::sync::{CancelToken, Conflict, ConflictResolver, Resolution, Syncer};

const PAGE_SIZE: usize = 5;

// ── Interactive conflict resolver ─────────────────────────────────

/// Asks the user which side of a divergent edit wins. Lives here, not in
/// the engine: non-interactive callers inject their own resolver.
pub struct StdinResolver;

impl ConflictResolver for StdinResolver {
    fn resolve(&self, conflict: &Conflict) -> Resolution {
        println!("You need to merge data with id - {}", conflict.id);
        println!(
            "Client data: {} {}",
            conflict.client.body, conflict.client.meta
        );
        println!(
            "Server data: {} {}",
            conflict.server.body, conflict.server.meta
        );

        loop {
            print!("Enter 'server' or 'client': ");
            let _ = io::stdout().flush();

            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                // On EOF or a read error the authoritative copy wins.
                Ok(0) | Err(_) => {
                    tracing::warn!(id = conflict.id, "No merge answer, keeping server copy");
                    return Resolution::TakeServer;
                }
                Ok(_) => {}
            }

            match line.trim() {
                "server" => return Resolution::TakeServer,
                "client" => return Resolution::TakeClient,
                _ => continue,
            }
        }
    }
}

// ── Command registry ──────────────────────────────────────────────

struct Command {
    name: &'static str,
    description: &'static str,
    category: &'static str,
    usage: &'static str,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        description: "show this command list",
        category: "system",
        usage: "help",
    },
    Command {
        name: "version",
        description: "get version of client binary",
        category: "system",
        usage: "version",
    },
    Command {
        name: "storage",
        description: "show path to directory where data stores",
        category: "system",
        usage: "storage",
    },
    Command {
        name: "sync",
        description: "synchronize your data with server",
        category: "system",
        usage: "sync [need auth]",
    },
    Command {
        name: "quit",
        description: "exit the app",
        category: "system",
        usage: "quit",
    },
    Command {
        name: "login",
        description: "start user session",
        category: "user",
        usage: "login",
    },
    Command {
        name: "register",
        description: "create user",
        category: "user",
        usage: "register",
    },
    Command {
        name: "cred-save",
        description: "save login password pair",
        category: "credential pair",
        usage: "cred-save",
    },
    Command {
        name: "cred-get",
        description: "get login password pairs",
        category: "credential pair",
        usage: "cred-get <page:int>",
    },
    Command {
        name: "cred-upd",
        description: "update login password pair by id",
        category: "credential pair",
        usage: "cred-upd <id:int>",
    },
    Command {
        name: "cred-del",
        description: "delete login password pair by id",
        category: "credential pair",
        usage: "cred-del <id:int>",
    },
    Command {
        name: "card-save",
        description: "save new card",
        category: "card",
        usage: "card-save",
    },
    Command {
        name: "card-get",
        description: "get cards",
        category: "card",
        usage: "card-get <page:int>",
    },
    Command {
        name: "card-upd",
        description: "update card by id",
        category: "card",
        usage: "card-upd <id:int>",
    },
    Command {
        name: "card-del",
        description: "delete card by id",
        category: "card",
        usage: "card-del <id:int>",
    },
    Command {
        name: "note-save",
        description: "save new note",
        category: "note",
        usage: "note-save",
    },
    Command {
        name: "note-get",
        description: "get notes",
        category: "note",
        usage: "note-get <page:int>",
    },
    Command {
        name: "note-upd",
        description: "update note by id",
        category: "note",
        usage: "note-upd <id:int>",
    },
    Command {
        name: "note-del",
        description: "delete note by id",
        category: "note",
        usage: "note-del <id:int>",
    },
    Command {
        name: "file-save",
        description: "save file",
        category: "file",
        usage: "file-save",
    },
    Command {
        name: "file-get",
        description: "get files",
        category: "file",
        usage: "file-get <page:int>",
    },
    Command {
        name: "file-decrypt",
        description: "decrypt file to given directory",
        category: "file",
        usage: "file-decrypt <id:int>",
    },
    Command {
        name: "file-upd",
        description: "update file by id",
        category: "file",
        usage: "file-upd <id:int>",
    },
    Command {
        name: "file-del",
        description: "delete file by id",
        category: "file",
        usage: "file-del <id:int>",
    },
];

const CATEGORIES: &[&str] = &["system", "user", "credential pair", "card", "note", "file"];

fn parse_id(args: &[String]) -> Result<i64, KeeperError> {
    let raw = args.first().ok_or(KeeperError::InvalidCommandUsage)?;
    raw.parse().map_err(|_| KeeperError::InvalidInput)
}

fn parse_page(args: &[String]) -> usize {
    args.first()
        .and_then(|raw| raw.parse().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1)
}

// ── The shell ─────────────────────────────────────────────────────

pub struct Shell {
    editor: DefaultEditor,
    session: Arc<ClientSession>,
    store: Arc<Mutex<LocalStore>>,
    cryptor: Arc<Cryptor>,
    users: UserApi,
    syncer: Arc<Syncer>,
    cancel: CancelToken,
    data_dir: PathBuf,
    quit: bool,
}

impl Shell {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<ClientSession>,
        store: Arc<Mutex<LocalStore>>,
        cryptor: Arc<Cryptor>,
        users: UserApi,
        syncer: Arc<Syncer>,
        cancel: CancelToken,
        data_dir: PathBuf,
    ) -> Result<Self, KeeperError> {
        let editor = DefaultEditor::new()
            .map_err(|e| KeeperError::Internal(format!("line editor init failed: {e}")))?;

        Ok(Self {
            editor,
            session,
            store,
            cryptor,
            users,
            syncer,
            cancel,
            data_dir,
            quit: false,
        })
    }

    pub fn run(&mut self) {
        println!("Goph Keeper");
        println!("Type 'help' to get command list");

        loop {
            let prompt = if self.session.is_auth() {
                "> "
            } else {
                "(no auth) > "
            };

            let line = match self.editor.readline(prompt) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Readline failed");
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let _ = self.editor.add_history_entry(line);

            let parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if let Err(e) = self.dispatch(&parts[0], &parts[1..]) {
                println!("executed with error - {e}");
            }

            if self.quit {
                break;
            }
        }
    }

    fn dispatch(&mut self, name: &str, args: &[String]) -> Result<(), KeeperError> {
        match name {
            "help" => self.cmd_help(),
            "version" => {
                println!("goph-keeper {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
            "storage" => {
                println!("{}", self.data_dir.display());
                Ok(())
            }
            "quit" => {
                self.quit = true;
                Ok(())
            }
            "sync" => self.cmd_sync(),
            "login" => self.cmd_login(),
            "register" => self.cmd_register(),
            "cred-save" => self.cmd_save(RecordKind::CredentialPair),
            "cred-get" => self.cmd_list(RecordKind::CredentialPair, args),
            "cred-upd" => self.cmd_update(RecordKind::CredentialPair, args),
            "cred-del" => self.cmd_delete(RecordKind::CredentialPair, args),
            "card-save" => self.cmd_save(RecordKind::Card),
            "card-get" => self.cmd_list(RecordKind::Card, args),
            "card-upd" => self.cmd_update(RecordKind::Card, args),
            "card-del" => self.cmd_delete(RecordKind::Card, args),
            "note-save" => self.cmd_save(RecordKind::Note),
            "note-get" => self.cmd_list(RecordKind::Note, args),
            "note-upd" => self.cmd_update(RecordKind::Note, args),
            "note-del" => self.cmd_delete(RecordKind::Note, args),
            "file-save" => self.cmd_save(RecordKind::File),
            "file-get" => self.cmd_list(RecordKind::File, args),
            "file-decrypt" => self.cmd_file_decrypt(args),
            "file-upd" => self.cmd_update(RecordKind::File, args),
            "file-del" => self.cmd_delete(RecordKind::File, args),
            _ => Err(KeeperError::CommandNotFound),
        }
    }

    fn cmd_help(&mut self) -> Result<(), KeeperError> {
        for category in CATEGORIES {
            println!("[{category}]");
            for command in COMMANDS.iter().filter(|c| c.category == *category) {
                println!("  {:<14} {} (usage: {})", command.name, command.description, command.usage);
            }
        }
        Ok(())
    }

    fn cmd_sync(&mut self) -> Result<(), KeeperError> {
        if !self.session.is_auth() {
            return Err(KeeperError::InvalidCommandUsage);
        }

        self.syncer.sync(&self.cancel)?;
        println!("Synchronized");
        Ok(())
    }

    fn cmd_login(&mut self) -> Result<(), KeeperError> {
        let email = self.prompt_nonempty("Email: ")?;
        let password = self.prompt_nonempty("Password: ")?;

        let token = self.users.authorize(&email, &password)?;
        self.session.set_token(token)?;
        println!("Successfully logged in");
        Ok(())
    }

    fn cmd_register(&mut self) -> Result<(), KeeperError> {
        let email = self.prompt_nonempty("Email: ")?;
        let password = self.prompt_nonempty("Password: ")?;

        let token = self.users.register(&email, &password)?;
        self.session.set_token(token)?;
        println!("Successfully registered");
        Ok(())
    }

    fn cmd_save(&mut self, kind: RecordKind) -> Result<(), KeeperError> {
        let body = self.prompt_body(kind)?;
        let meta = self.prompt("Meta: ")?;

        let ciphertext = self.cryptor.encrypt(&body.encode()?)?;
        let id = self.store()?.add(kind, ciphertext, meta)?;

        println!("Saved {kind} with id {id}");
        Ok(())
    }

    fn cmd_list(&mut self, kind: RecordKind, args: &[String]) -> Result<(), KeeperError> {
        let page = parse_page(args);
        let filters = ListFilters {
            pagination: Some(Pagination {
                page,
                count: PAGE_SIZE,
            }),
            newest_first: true,
        };

        let (records, total) = {
            let store = self.store()?;
            (store.list_by_kind(kind, &filters), store.count_by_kind(kind))
        };

        if records.is_empty() {
            println!("Nothing to show");
            return Ok(());
        }

        for record in &records {
            match self
                .cryptor
                .decrypt(&record.ciphertext)
                .and_then(|raw| RecordBody::decode(record.kind, &raw))
            {
                Ok(body) => println!(
                    "[{}] {} | {} | version {}",
                    record.id, body, record.meta, record.version
                ),
                Err(e) => {
                    tracing::error!(id = record.id, error = %e, "Record is unreadable");
                    println!("[{}] <unreadable record>", record.id);
                }
            }
        }

        println!("Page {page} of {}", total.div_ceil(PAGE_SIZE).max(1));
        Ok(())
    }

    fn cmd_update(&mut self, kind: RecordKind, args: &[String]) -> Result<(), KeeperError> {
        let id = parse_id(args)?;
        let existing = self.store()?.get_by_id(id)?;
        if existing.kind != kind {
            return Err(KeeperError::NotFound);
        }

        let body = self.prompt_body(kind)?;
        let meta = self.prompt("Meta: ")?;

        let ciphertext = self.cryptor.encrypt(&body.encode()?)?;
        self.store()?.update_by_id(id, ciphertext, meta)?;
        self.session.add_edited(id)?;

        println!("Updated {kind} with id {id}");
        Ok(())
    }

    fn cmd_delete(&mut self, kind: RecordKind, args: &[String]) -> Result<(), KeeperError> {
        let id = parse_id(args)?;
        let existing = self.store()?.get_by_id(id)?;
        if existing.kind != kind {
            return Err(KeeperError::NotFound);
        }

        self.store()?.delete_by_id(id)?;
        self.session.add_deleted(id)?;

        println!("Deleted {kind} with id {id}");
        Ok(())
    }

    fn cmd_file_decrypt(&mut self, args: &[String]) -> Result<(), KeeperError> {
        let id = parse_id(args)?;
        let record = self.store()?.get_by_id(id)?;
        if record.kind != RecordKind::File {
            return Err(KeeperError::NotFound);
        }

        let raw = self.cryptor.decrypt(&record.ciphertext)?;
        let RecordBody::File(payload) = RecordBody::decode(record.kind, &raw)? else {
            return Err(KeeperError::Integrity("body-decode-failed"));
        };

        let dir = self.prompt_nonempty("Output directory: ")?;
        let target = Path::new(&dir).join(&payload.name);
        fs::write(&target, &payload.content)?;

        println!("Decrypted to {}", target.display());
        Ok(())
    }

    fn prompt_body(&mut self, kind: RecordKind) -> Result<RecordBody, KeeperError> {
        match kind {
            RecordKind::CredentialPair => {
                let login = self.prompt_nonempty("Login: ")?;
                let password = self.prompt_nonempty("Password: ")?;
                Ok(RecordBody::CredentialPair(CredentialPair {
                    login,
                    password,
                }))
            }
            RecordKind::Card => {
                let number = self.prompt_nonempty("Card number: ")?;
                let expires_at = self.prompt_nonempty("Expires at (mm/yy): ")?;
                let cvv = self.prompt_nonempty("CVV: ")?;
                Ok(RecordBody::Card(CardDetails {
                    number,
                    expires_at,
                    cvv,
                }))
            }
            RecordKind::Note => {
                let text = self.prompt_nonempty("Text: ")?;
                Ok(RecordBody::Note(NoteText { text }))
            }
            RecordKind::File => {
                let path = self.prompt_nonempty("Path to file: ")?;
                let content = fs::read(&path)?;
                let name = Path::new(&path)
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or(KeeperError::InvalidInput)?
                    .to_string();
                Ok(RecordBody::File(FilePayload { name, content }))
            }
        }
    }

    fn prompt(&mut self, label: &str) -> Result<String, KeeperError> {
        match self.editor.readline(label) {
            Ok(line) => Ok(line.trim().to_string()),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                Err(KeeperError::InvalidInput)
            }
            Err(e) => {
                tracing::error!(error = %e, "Prompt failed");
                Err(KeeperError::InvalidInput)
            }
        }
    }

    fn prompt_nonempty(&mut self, label: &str) -> Result<String, KeeperError> {
        let value = self.prompt(label)?;
        if value.is_empty() {
            return Err(KeeperError::InvalidInput);
        }
        Ok(value)
    }

    fn store(&self) -> Result<MutexGuard<'_, LocalStore>, KeeperError> {
        self.store
            .lock()
            .map_err(|_| KeeperError::Internal("local store lock poisoned".to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────
