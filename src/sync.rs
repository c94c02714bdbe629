use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api::ServerApi;
use crate::cryptor::Cryptor;
use crate::error::KeeperError;
use crate::local_store::LocalStore;
use crate::record::{Record, RecordBody};
use crate::session::ClientSession;

// ── Cancellation ──────────────────────────────────────────────────

/// Cooperative cancellation flag shared between the shell, the background
/// scheduler and the engine.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn checkpoint(&self) -> Result<(), KeeperError> {
        if self.is_cancelled() {
            Err(KeeperError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ── Conflict mediation ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the local copy with the server state.
    TakeServer,
    /// Push the local copy to the server.
    TakeClient,
}

/// Decrypted view of one side of a conflict, for display to the user.
pub struct RecordView {
    pub body: RecordBody,
    pub meta: String,
    pub version: i64,
}

/// A record edited locally whose server version also advanced since the
/// client last observed it.
pub struct Conflict {
    pub id: i64,
    pub client: RecordView,
    pub server: RecordView,
}

/// Decides divergent concurrent edits. The engine never talks to a terminal
/// itself; interactive and deterministic resolvers are injected.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> Resolution;
}

// ── The sync plan ─────────────────────────────────────────────────

/// Every id present on either side falls into exactly one of these buckets
/// (or is already convergent and untouched).
#[derive(Default)]
struct SyncPlan {
    delete_from_client: Vec<i64>,
    delete_from_server: Vec<i64>,
    edit_on_client: Vec<Record>,
    edit_on_server: Vec<Record>,
    add_to_server: Vec<Record>,
    add_to_client: Vec<Record>,
}

impl SyncPlan {
    /// Map iteration order is arbitrary; fix it so retries and logs are
    /// stable.
    fn sort(&mut self) {
        self.delete_from_client.sort_unstable();
        self.delete_from_server.sort_unstable();
        self.edit_on_client.sort_by_key(|r| r.id);
        self.edit_on_server.sort_by_key(|r| r.id);
        self.add_to_server.sort_by_key(|r| r.id);
        self.add_to_client.sort_by_key(|r| r.id);
    }
}

// ── The engine ────────────────────────────────────────────────────

/// Reconciles the offline replica with the authoritative server store.
pub struct Syncer {
    session: Arc<ClientSession>,
    server: Arc<dyn ServerApi>,
    local: Arc<Mutex<LocalStore>>,
    cryptor: Arc<Cryptor>,
    resolver: Arc<dyn ConflictResolver>,
    in_flight: Mutex<()>,
}

impl Syncer {
    pub fn new(
        session: Arc<ClientSession>,
        server: Arc<dyn ServerApi>,
        local: Arc<Mutex<LocalStore>>,
        cryptor: Arc<Cryptor>,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Self {
        Self {
            session,
            server,
            local,
            cryptor,
            resolver,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one reconciliation pass. Without an authenticated session this is
    /// a silent no-op. Concurrent calls are single-flight: the second caller
    /// returns immediately.
    ///
    /// Partial progress is never rolled back; the journal is cleared only
    /// after a fully successful pass, so an aborted pass resumes correctly
    /// on the next call.
    pub fn sync(&self, cancel: &CancelToken) -> Result<(), KeeperError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Sync already in flight, skipping");
            return Ok(());
        };

        if !self.session.is_auth() {
            return Ok(());
        }

        match self.run(cancel) {
            Err(KeeperError::NotAuthenticated) => {
                tracing::debug!("Session rejected by server, aborting sync");
                Ok(())
            }
            result => result,
        }
    }

    fn run(&self, cancel: &CancelToken) -> Result<(), KeeperError> {
        cancel.checkpoint()?;
        let server_map: HashMap<i64, Record> = self
            .server
            .get_all()?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        let client_map: HashMap<i64, Record> = self
            .local()?
            .get_all()
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        let plan = self.classify(&server_map, &client_map);
        tracing::info!(
            delete_from_client = plan.delete_from_client.len(),
            delete_from_server = plan.delete_from_server.len(),
            edit_on_client = plan.edit_on_client.len(),
            edit_on_server = plan.edit_on_server.len(),
            add_to_server = plan.add_to_server.len(),
            add_to_client = plan.add_to_client.len(),
            "Sync plan prepared"
        );

        // Deletions run first so a later edit cannot resurrect a tombstone.
        if !plan.delete_from_client.is_empty() {
            self.local()?.delete_batch(&plan.delete_from_client)?;
        }

        cancel.checkpoint()?;
        if !plan.delete_from_server.is_empty() {
            match self.server.delete_batch(&plan.delete_from_server) {
                // A stale journal entry may point at a row the server
                // already dropped; gone is what we wanted.
                Err(e) if e.is_not_found() => {}
                other => other?,
            }
        }

        for record in &plan.edit_on_client {
            let mut local = self.local()?;
            local.update_by_id(record.id, record.ciphertext.clone(), record.meta.clone())?;
            local.remap(record.id, record.id, record.version)?;
        }

        for record in &plan.edit_on_server {
            cancel.checkpoint()?;
            let updated = self
                .server
                .update_by_id(record.id, &record.ciphertext, &record.meta)?;
            self.local()?.remap(record.id, updated.id, updated.version)?;
        }

        // Uploads run before pulls so a record uploaded in this pass is not
        // pulled straight back as a duplicate. A failed upload skips to the
        // next record; the record stays local and retries next pass.
        for record in &plan.add_to_server {
            cancel.checkpoint()?;
            match self.server.add(record) {
                Ok(uploaded) => {
                    self.local()?
                        .remap(record.id, uploaded.id, uploaded.version)?;
                }
                Err(e) => {
                    tracing::warn!(id = record.id, error = %e, "Failed to upload record, continuing");
                }
            }
        }

        for record in &plan.add_to_client {
            let mut local = self.local()?;
            let minted = local.add(record.kind, record.ciphertext.clone(), record.meta.clone())?;
            local.remap(minted, record.id, record.version)?;
        }

        cancel.checkpoint()?;
        self.session.clear_deleted()?;
        self.session.clear_edited()?;

        tracing::info!("Sync completed");
        Ok(())
    }

    fn classify(
        &self,
        server_map: &HashMap<i64, Record>,
        client_map: &HashMap<i64, Record>,
    ) -> SyncPlan {
        let mut plan = SyncPlan::default();

        for (id, server_record) in server_map {
            if self.session.is_deleted(*id) {
                plan.delete_from_server.push(*id);
                continue;
            }

            let Some(client_record) = client_map.get(id) else {
                plan.add_to_client.push(server_record.clone());
                continue;
            };

            if self.session.is_edited(*id) {
                if server_record.version != client_record.version {
                    // Both sides moved since the last sync; the user decides.
                    match self.mediate(client_record, server_record) {
                        Some(Resolution::TakeServer) => {
                            plan.edit_on_client.push(server_record.clone())
                        }
                        Some(Resolution::TakeClient) => {
                            plan.edit_on_server.push(client_record.clone())
                        }
                        None => {}
                    }
                } else {
                    plan.edit_on_server.push(client_record.clone());
                }
            } else if server_record.version != client_record.version {
                plan.edit_on_client.push(server_record.clone());
            }
            // Same version and no local edit: already convergent.
        }

        for (id, client_record) in client_map {
            if server_map.contains_key(id) {
                continue;
            }

            // A negative id is meaningless globally, so it can only be a
            // pending upload. A positive id the server no longer returns was
            // deleted by another device.
            if client_record.is_local() {
                plan.add_to_server.push(client_record.clone());
            } else {
                plan.delete_from_client.push(*id);
            }
        }

        plan.sort();
        plan
    }

    /// Build both decrypted views and ask the resolver. A record whose
    /// ciphertext cannot be opened is skipped (and logged); the rest of the
    /// pass proceeds.
    fn mediate(&self, client: &Record, server: &Record) -> Option<Resolution> {
        let client_view = match self.view(client) {
            Ok(view) => view,
            Err(e) => {
                tracing::error!(id = client.id, error = %e, "Skipping conflict: client copy unreadable");
                return None;
            }
        };
        let server_view = match self.view(server) {
            Ok(view) => view,
            Err(e) => {
                tracing::error!(id = server.id, error = %e, "Skipping conflict: server copy unreadable");
                return None;
            }
        };

        Some(self.resolver.resolve(&Conflict {
            id: server.id,
            client: client_view,
            server: server_view,
        }))
    }

    fn view(&self, record: &Record) -> Result<RecordView, KeeperError> {
        let raw = self.cryptor.decrypt(&record.ciphertext)?;
        let body = RecordBody::decode(record.kind, &raw)?;
        Ok(RecordView {
            body,
            meta: record.meta.clone(),
            version: record.version,
        })
    }

    fn local(&self) -> Result<MutexGuard<'_, LocalStore>, KeeperError> {
        self.local
            .lock()
            .map_err(|_| KeeperError::Internal("local store lock poisoned".to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{now_secs, NoteText, RecordKind};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize};

    // A server-side double implementing the engine's seam against a plain
    // map, with switchable failure modes.
    #[derive(Default)]
    struct FakeServer {
        records: Mutex<HashMap<i64, Record>>,
        next_id: AtomicI64,
        fail_adds: AtomicBool,
        fail_updates: AtomicBool,
        fail_deletes: AtomicBool,
        add_calls: AtomicUsize,
    }

    impl FakeServer {
        fn new() -> Self {
            let server = Self::default();
            server.next_id.store(1, Ordering::SeqCst);
            server
        }

        fn seed(&self, record: Record) {
            self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
            self.records.lock().unwrap().insert(record.id, record);
        }

        fn snapshot(&self) -> Vec<Record> {
            let mut records: Vec<Record> =
                self.records.lock().unwrap().values().cloned().collect();
            records.sort_by_key(|r| r.id);
            records
        }
    }

    impl ServerApi for FakeServer {
        fn get_all(&self) -> Result<Vec<Record>, KeeperError> {
            Ok(self.snapshot())
        }

        fn add(&self, record: &Record) -> Result<Record, KeeperError> {
            self.add_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_adds.load(Ordering::SeqCst) {
                return Err(KeeperError::Transport("add refused".to_string()));
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let stored = Record {
                id,
                owner_id: 1,
                kind: record.kind,
                ciphertext: record.ciphertext.clone(),
                meta: record.meta.clone(),
                version: 1,
                created_at: now_secs(),
            };
            self.records.lock().unwrap().insert(id, stored.clone());
            Ok(stored)
        }

        fn update_by_id(
            &self,
            id: i64,
            ciphertext: &str,
            meta: &str,
        ) -> Result<Record, KeeperError> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(KeeperError::Transport("update refused".to_string()));
            }

            let mut records = self.records.lock().unwrap();
            let record = records.get_mut(&id).ok_or(KeeperError::NotFound)?;
            record.ciphertext = ciphertext.to_string();
            record.meta = meta.to_string();
            record.version += 1;
            Ok(record.clone())
        }

        fn delete_batch(&self, ids: &[i64]) -> Result<(), KeeperError> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(KeeperError::Transport("delete refused".to_string()));
            }

            let mut records = self.records.lock().unwrap();
            for id in ids {
                records.remove(id);
            }
            Ok(())
        }
    }

    struct FixedResolver(Resolution);

    impl ConflictResolver for FixedResolver {
        fn resolve(&self, _conflict: &Conflict) -> Resolution {
            self.0
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        session: Arc<ClientSession>,
        store: Arc<Mutex<LocalStore>>,
        server: Arc<FakeServer>,
        cryptor: Arc<Cryptor>,
        syncer: Syncer,
    }

    fn harness(resolution: Resolution) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let session =
            Arc::new(ClientSession::open(&dir.path().join("session.json")).unwrap());
        session.set_token("token".to_string()).unwrap();
        let store = Arc::new(Mutex::new(
            LocalStore::open(&dir.path().join("user_stored_data.json")).unwrap(),
        ));
        let server = Arc::new(FakeServer::new());
        let cryptor = Arc::new(Cryptor::new(&[0x42; 32]).unwrap());

        let syncer = Syncer::new(
            session.clone(),
            server.clone(),
            store.clone(),
            cryptor.clone(),
            Arc::new(FixedResolver(resolution)),
        );

        Harness {
            _dir: dir,
            session,
            store,
            server,
            cryptor,
            syncer,
        }
    }

    fn note_ciphertext(cryptor: &Cryptor, text: &str) -> String {
        let body = RecordBody::Note(NoteText {
            text: text.to_string(),
        });
        cryptor.encrypt(&body.encode().unwrap()).unwrap()
    }

    fn server_note(cryptor: &Cryptor, id: i64, version: i64, text: &str, meta: &str) -> Record {
        Record {
            id,
            owner_id: 1,
            kind: RecordKind::Note,
            ciphertext: note_ciphertext(cryptor, text),
            meta: meta.to_string(),
            version,
            created_at: 0,
        }
    }

    /// Insert a note locally and rewrite it to a synced (positive id)
    /// record, as a previous successful sync would have left it.
    fn synced_local_note(h: &Harness, id: i64, version: i64, text: &str, meta: &str) {
        let mut store = h.store.lock().unwrap();
        let minted = store
            .add(
                RecordKind::Note,
                note_ciphertext(&h.cryptor, text),
                meta.to_string(),
            )
            .unwrap();
        store.remap(minted, id, version).unwrap();
    }

    fn convergence_key(record: &Record) -> (i64, i64, String, String, RecordKind) {
        (
            record.id,
            record.version,
            record.ciphertext.clone(),
            record.meta.clone(),
            record.kind,
        )
    }

    fn assert_convergent(h: &Harness) {
        let mut local: Vec<_> = h
            .store
            .lock()
            .unwrap()
            .get_all()
            .iter()
            .map(convergence_key)
            .collect();
        let mut server: Vec<_> = h.server.snapshot().iter().map(convergence_key).collect();
        local.sort_by_key(|entry| entry.0);
        server.sort_by_key(|entry| entry.0);
        assert_eq!(local, server);
    }

    #[test]
    fn test_fresh_upload() {
        let h = harness(Resolution::TakeServer);
        let ciphertext = note_ciphertext(&h.cryptor, "hi");
        h.store
            .lock()
            .unwrap()
            .add(RecordKind::Note, ciphertext.clone(), "t".to_string())
            .unwrap();

        h.syncer.sync(&CancelToken::new()).unwrap();

        let local = h.store.lock().unwrap().get_all();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, 1);
        assert_eq!(local[0].version, 1);
        assert_eq!(local[0].ciphertext, ciphertext);
        assert!(!local[0].is_local());
        assert_convergent(&h);
    }

    #[test]
    fn test_first_pull() {
        let h = harness(Resolution::TakeServer);
        h.server
            .seed(server_note(&h.cryptor, 7, 3, "from server", "t"));

        h.syncer.sync(&CancelToken::new()).unwrap();

        let local = h.store.lock().unwrap().get_all();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, 7);
        assert_eq!(local[0].version, 3);

        let raw = h.cryptor.decrypt(&local[0].ciphertext).unwrap();
        let body = RecordBody::decode(RecordKind::Note, &raw).unwrap();
        assert_eq!(
            body,
            RecordBody::Note(NoteText {
                text: "from server".to_string()
            })
        );
        assert_convergent(&h);
    }

    #[test]
    fn test_deletion_propagates() {
        let h = harness(Resolution::TakeServer);
        h.server.seed(server_note(&h.cryptor, 7, 1, "doomed", ""));
        h.session.add_deleted(7).unwrap();

        h.syncer.sync(&CancelToken::new()).unwrap();

        assert!(h.server.snapshot().is_empty());
        assert!(h.store.lock().unwrap().get_all().is_empty());
        assert!(!h.session.is_deleted(7));
    }

    #[test]
    fn test_server_newer_edit_overwrites_local() {
        let h = harness(Resolution::TakeServer);
        synced_local_note(&h, 5, 1, "old", "old");
        h.server.seed(server_note(&h.cryptor, 5, 2, "fresh", "new"));

        h.syncer.sync(&CancelToken::new()).unwrap();

        let local = h.store.lock().unwrap().get_by_id(5).unwrap();
        assert_eq!(local.version, 2);
        assert_eq!(local.meta, "new");
        assert_eq!(h.server.snapshot()[0].version, 2);
        assert_convergent(&h);
    }

    #[test]
    fn test_client_only_edit_pushes() {
        let h = harness(Resolution::TakeServer);
        synced_local_note(&h, 5, 1, "B", "m");
        h.server.seed(server_note(&h.cryptor, 5, 1, "A", "m"));
        h.session.add_edited(5).unwrap();

        h.syncer.sync(&CancelToken::new()).unwrap();

        let server = h.server.snapshot();
        assert_eq!(server[0].version, 2);
        let raw = h.cryptor.decrypt(&server[0].ciphertext).unwrap();
        assert_eq!(
            RecordBody::decode(RecordKind::Note, &raw).unwrap(),
            RecordBody::Note(NoteText {
                text: "B".to_string()
            })
        );

        assert_eq!(h.store.lock().unwrap().get_by_id(5).unwrap().version, 2);
        assert!(!h.session.is_edited(5));
        assert_convergent(&h);
    }

    #[test]
    fn test_conflict_resolved_for_server() {
        let h = harness(Resolution::TakeServer);
        synced_local_note(&h, 5, 1, "mine", "client");
        h.session.add_edited(5).unwrap();
        h.server
            .seed(server_note(&h.cryptor, 5, 2, "theirs", "server"));

        h.syncer.sync(&CancelToken::new()).unwrap();

        let local = h.store.lock().unwrap().get_by_id(5).unwrap();
        assert_eq!(local.version, 2);
        assert_eq!(local.meta, "server");
        assert_eq!(h.server.snapshot()[0].version, 2);
        assert!(!h.session.is_edited(5));
        assert_convergent(&h);
    }

    #[test]
    fn test_conflict_resolved_for_client() {
        let h = harness(Resolution::TakeClient);
        synced_local_note(&h, 5, 1, "mine", "client");
        h.session.add_edited(5).unwrap();
        h.server
            .seed(server_note(&h.cryptor, 5, 2, "theirs", "server"));

        h.syncer.sync(&CancelToken::new()).unwrap();

        let server = h.server.snapshot();
        assert_eq!(server[0].version, 3);
        assert_eq!(server[0].meta, "client");
        let local = h.store.lock().unwrap().get_by_id(5).unwrap();
        assert_eq!(local.version, 3);
        assert_eq!(local.meta, "client");
        assert_convergent(&h);
    }

    #[test]
    fn test_vanished_server_record_deleted_locally() {
        let h = harness(Resolution::TakeServer);
        // Synced once, but the server no longer returns it and we never
        // journaled an intent: another device deleted it.
        synced_local_note(&h, 3, 1, "gone elsewhere", "");

        h.syncer.sync(&CancelToken::new()).unwrap();

        assert!(h.store.lock().unwrap().get_all().is_empty());
    }

    #[test]
    fn test_same_version_untouched_is_noop() {
        let h = harness(Resolution::TakeServer);
        synced_local_note(&h, 5, 1, "same", "m");
        h.server.seed(server_note(&h.cryptor, 5, 1, "same", "m"));
        let before_local = h.store.lock().unwrap().get_all();
        let before_server = h.server.snapshot();

        h.syncer.sync(&CancelToken::new()).unwrap();

        assert_eq!(h.store.lock().unwrap().get_all(), before_local);
        assert_eq!(h.server.snapshot(), before_server);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let h = harness(Resolution::TakeServer);
        h.store
            .lock()
            .unwrap()
            .add(
                RecordKind::Note,
                note_ciphertext(&h.cryptor, "upload me"),
                String::new(),
            )
            .unwrap();
        h.server.seed(server_note(&h.cryptor, 9, 4, "pull me", ""));

        h.syncer.sync(&CancelToken::new()).unwrap();
        let local_after_first = h.store.lock().unwrap().get_all();
        let server_after_first = h.server.snapshot();

        h.syncer.sync(&CancelToken::new()).unwrap();

        assert_eq!(h.store.lock().unwrap().get_all(), local_after_first);
        assert_eq!(h.server.snapshot(), server_after_first);
        assert_convergent(&h);
    }

    #[test]
    fn test_unauthenticated_sync_is_a_noop() {
        let h = harness(Resolution::TakeServer);
        h.session.set_token(String::new()).unwrap();
        h.server.seed(server_note(&h.cryptor, 1, 1, "ignored", ""));

        h.syncer.sync(&CancelToken::new()).unwrap();

        assert!(h.store.lock().unwrap().get_all().is_empty());
    }

    #[test]
    fn test_journal_survives_failed_pass() {
        let h = harness(Resolution::TakeServer);
        h.server.seed(server_note(&h.cryptor, 7, 1, "doomed", ""));
        h.session.add_deleted(7).unwrap();
        h.server.fail_deletes.store(true, Ordering::SeqCst);

        assert!(h.syncer.sync(&CancelToken::new()).is_err());
        assert!(h.session.is_deleted(7));
        assert_eq!(h.server.snapshot().len(), 1);

        // Network restored: the next pass finishes the job.
        h.server.fail_deletes.store(false, Ordering::SeqCst);
        h.syncer.sync(&CancelToken::new()).unwrap();
        assert!(h.server.snapshot().is_empty());
        assert!(!h.session.is_deleted(7));
    }

    #[test]
    fn test_upload_failures_skip_to_next_record() {
        let h = harness(Resolution::TakeServer);
        {
            let mut store = h.store.lock().unwrap();
            store
                .add(
                    RecordKind::Note,
                    note_ciphertext(&h.cryptor, "first"),
                    String::new(),
                )
                .unwrap();
            store
                .add(
                    RecordKind::Note,
                    note_ciphertext(&h.cryptor, "second"),
                    String::new(),
                )
                .unwrap();
        }
        h.server.fail_adds.store(true, Ordering::SeqCst);

        // Both uploads fail, but the pass still completes.
        h.syncer.sync(&CancelToken::new()).unwrap();
        assert_eq!(h.server.add_calls.load(Ordering::SeqCst), 2);
        assert!(h
            .store
            .lock()
            .unwrap()
            .get_all()
            .iter()
            .all(Record::is_local));

        h.server.fail_adds.store(false, Ordering::SeqCst);
        h.syncer.sync(&CancelToken::new()).unwrap();
        assert_eq!(h.server.snapshot().len(), 2);
        assert_convergent(&h);
    }

    #[test]
    fn test_aborted_edit_phase_keeps_journal() {
        let h = harness(Resolution::TakeServer);
        synced_local_note(&h, 5, 1, "local edit", "m");
        h.server.seed(server_note(&h.cryptor, 5, 1, "old", "m"));
        h.session.add_edited(5).unwrap();
        h.server.fail_updates.store(true, Ordering::SeqCst);

        assert!(h.syncer.sync(&CancelToken::new()).is_err());
        assert!(h.session.is_edited(5));

        h.server.fail_updates.store(false, Ordering::SeqCst);
        h.syncer.sync(&CancelToken::new()).unwrap();
        assert!(!h.session.is_edited(5));
        assert_eq!(h.server.snapshot()[0].version, 2);
        assert_convergent(&h);
    }

    #[test]
    fn test_cancelled_token_aborts_before_side_effects() {
        let h = harness(Resolution::TakeServer);
        h.server.seed(server_note(&h.cryptor, 7, 1, "stay", ""));
        h.session.add_deleted(7).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            h.syncer.sync(&cancel),
            Err(KeeperError::Cancelled)
        ));
        assert!(h.session.is_deleted(7));
        assert_eq!(h.server.snapshot().len(), 1);
    }

    #[test]
    fn test_unreadable_conflict_is_skipped() {
        let h = harness(Resolution::TakeServer);
        // Local copy carries a corrupt envelope.
        {
            let mut store = h.store.lock().unwrap();
            let minted = store
                .add(
                    RecordKind::Note,
                    "%%% not an envelope %%%".to_string(),
                    "m".to_string(),
                )
                .unwrap();
            store.remap(minted, 5, 1).unwrap();
        }
        h.session.add_edited(5).unwrap();
        h.server.seed(server_note(&h.cryptor, 5, 2, "theirs", "m"));

        h.syncer.sync(&CancelToken::new()).unwrap();

        // Neither side was touched for the skipped record.
        assert_eq!(h.store.lock().unwrap().get_by_id(5).unwrap().version, 1);
        assert_eq!(h.server.snapshot()[0].version, 2);
    }
}
