//! Chat state store
//!
//! Owns every chat session for the lifetime of the process. All reads and
//! mutations go through one coarse mutex; callers only ever see clones.
//!
//! On-disk layout under the base path:
//!
//! ```text
//! chats/<chat_id>/chat.jsonl   append-only message log, last line per id wins
//! chats/<chat_id>/info.json    memory + daily quota snapshot (atomic overwrite)
//! chats/<chat_id>/cursor.txt   id of the newest message folded into memory
//! last_update_id.txt           inbound stream offset, process-wide
//! ```
//!
//! Writes happen synchronously inside the mutation. A failed write is logged
//! and queued; the queue is retried at the start of the next mutation, so a
//! full disk never stalls message intake.
//!
//! A snapshot that exists but cannot be read is moved to `info.json.bad`
//! before defaults take its place. A store opened with
//! [`ChatStateStore::open_read_only`] never touches the disk.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::memory::MemoryRecord;
use super::message::Message;

pub const DEFAULT_DAILY_LIMIT: u32 = 30;

const CHATS_DIR: &str = "chats";
const LOG_FILE: &str = "chat.jsonl";
const SNAPSHOT_FILE: &str = "info.json";
const CURSOR_FILE: &str = "cursor.txt";
const OFFSET_FILE: &str = "last_update_id.txt";
const SET_ASIDE_SUFFIX: &str = "bad";
const QUOTA_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Per-chat daily generation budget, shared by replies and memory updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuota {
    #[serde(default)]
    pub count: u32,
    /// `YYYY-MM-DD` of the last consumption; empty if never used.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub limit: u32,
}

impl DailyQuota {
    fn with_limit(limit: u32) -> Self {
        Self {
            count: 0,
            date: String::new(),
            limit,
        }
    }

    /// Reset on date rollover, then consume one unit if under the limit.
    fn try_consume(&mut self, today: NaiveDate) -> bool {
        let today = today.format(QUOTA_DATE_FORMAT).to_string();
        if self.date != today {
            self.date = today;
            self.count = 0;
        }
        if self.count >= self.limit {
            return false;
        }
        self.count += 1;
        true
    }

    /// Whether [`Self::try_consume`] would succeed, without consuming.
    fn is_available(&self, today: NaiveDate) -> bool {
        if self.date != today.format(QUOTA_DATE_FORMAT).to_string() {
            return self.limit > 0;
        }
        self.count < self.limit
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub chat_id: i64,
    /// Keyed and ordered by message id.
    pub messages: BTreeMap<i64, Message>,
    pub memory: MemoryRecord,
    pub last_distilled_message_id: i64,
    pub quota: DailyQuota,
}

impl ChatSession {
    fn new(chat_id: i64, limit: u32) -> Self {
        Self {
            chat_id,
            messages: BTreeMap::new(),
            memory: MemoryRecord::default(),
            last_distilled_message_id: 0,
            quota: DailyQuota::with_limit(limit),
        }
    }

    pub fn newest_message_id(&self) -> Option<i64> {
        self.messages.keys().next_back().copied()
    }

    /// Last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.values().skip(skip).cloned().collect()
    }
}

/// Consistent read of what the scheduler needs for one chat, taken under a
/// single lock span.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub chat_id: i64,
    pub recent: Vec<Message>,
    pub memory: MemoryRecord,
    pub last_distilled_message_id: i64,
}

impl SessionView {
    pub fn last_message(&self) -> Option<&Message> {
        self.recent.last()
    }
}

/// Compact description of a session for the `inspect` command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub chat_id: i64,
    pub message_count: usize,
    pub newest_message_id: Option<i64>,
    pub last_distilled_message_id: i64,
    pub quota: DailyQuota,
    pub memory: MemoryRecord,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    memory: MemoryRecord,
    quota: DailyQuota,
}

#[derive(Default)]
struct PendingWrites {
    /// Log lines not yet on disk, in write order.
    lines: Vec<(i64, String)>,
    snapshots: BTreeSet<i64>,
    cursors: BTreeSet<i64>,
    offset: Option<i64>,
}

impl PendingWrites {
    fn is_empty(&self) -> bool {
        self.lines.is_empty()
            && self.snapshots.is_empty()
            && self.cursors.is_empty()
            && self.offset.is_none()
    }

    fn has_lines_for(&self, chat_id: i64) -> bool {
        self.lines.iter().any(|(id, _)| *id == chat_id)
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<i64, ChatSession>,
    pending: PendingWrites,
}

pub struct ChatStateStore {
    base_path: PathBuf,
    default_limit: u32,
    read_only: bool,
    inner: Mutex<StoreInner>,
}

impl ChatStateStore {
    /// Open the store at `base_path`, replaying every chat found on disk.
    pub fn open(base_path: impl Into<PathBuf>, default_limit: u32) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        let chats_dir = base_path.join(CHATS_DIR);
        fs::create_dir_all(&chats_dir).map_err(io_err(&chats_dir))?;
        Self::load(base_path, default_limit, false)
    }

    /// Open for inspection. Nothing is created or written, not even for
    /// mutations, and a missing state directory reads as an empty store.
    pub fn open_read_only(base_path: impl Into<PathBuf>, default_limit: u32) -> Result<Self, StoreError> {
        Self::load(base_path.into(), default_limit, true)
    }

    fn load(base_path: PathBuf, default_limit: u32, read_only: bool) -> Result<Self, StoreError> {
        let store = Self {
            base_path,
            default_limit,
            read_only,
            inner: Mutex::new(StoreInner::default()),
        };
        store.load_from_disk()?;
        Ok(store)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn chat_dir(&self, chat_id: i64) -> PathBuf {
        self.base_path.join(CHATS_DIR).join(chat_id.to_string())
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        let chats_dir = self.base_path.join(CHATS_DIR);
        let entries = match fs::read_dir(&chats_dir) {
            Ok(entries) => entries,
            Err(e) if self.read_only && e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(&chats_dir)(e)),
        };

        let mut inner = self.inner.lock();
        for entry in entries {
            let entry = entry.map_err(io_err(&chats_dir))?;
            let Some(chat_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
            else {
                continue;
            };
            let session = self.load_session(chat_id)?;
            tracing::debug!(
                chat_id,
                messages = session.messages.len(),
                cursor = session.last_distilled_message_id,
                "chat session restored"
            );
            inner.sessions.insert(chat_id, session);
        }
        tracing::info!(chats = inner.sessions.len(), "chat state loaded");
        Ok(())
    }

    fn load_session(&self, chat_id: i64) -> Result<ChatSession, StoreError> {
        let dir = self.chat_dir(chat_id);
        let mut session = ChatSession::new(chat_id, self.default_limit);

        let log_path = dir.join(LOG_FILE);
        if log_path.exists() {
            let file = File::open(&log_path).map_err(io_err(&log_path))?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(io_err(&log_path))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(&line) {
                    Ok(msg) => {
                        session.messages.insert(msg.message_id, msg);
                    }
                    Err(e) => tracing::warn!(
                        chat_id,
                        line = line_no + 1,
                        error = %e,
                        "skipping unreadable chat log line"
                    ),
                }
            }
        }

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        match read_snapshot(&snapshot_path) {
            Ok(Some(snapshot)) => {
                session.memory = snapshot.memory;
                session.quota = snapshot.quota;
                if session.quota.limit == 0 {
                    session.quota.limit = self.default_limit;
                }
            }
            Ok(None) if self.read_only => {}
            Ok(None) => write_snapshot(&dir, &session)?,
            Err(e) if self.read_only => {
                tracing::warn!(chat_id, error = %e, "unreadable snapshot, showing defaults");
            }
            Err(e) => {
                // A failed rename aborts the load.
                let aside = set_aside(&snapshot_path)?;
                tracing::warn!(
                    chat_id,
                    error = %e,
                    moved_to = %aside.display(),
                    "unreadable snapshot set aside, starting from defaults"
                );
                write_snapshot(&dir, &session)?;
            }
        }

        let cursor_path = dir.join(CURSOR_FILE);
        if cursor_path.exists() {
            let raw = fs::read_to_string(&cursor_path).map_err(io_err(&cursor_path))?;
            session.last_distilled_message_id = raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(chat_id, value = %raw.trim(), "invalid distillation cursor, using 0");
                0
            });
        }

        Ok(session)
    }

    /// Clone of the session, created (and persisted) if absent.
    pub fn get(&self, chat_id: i64) -> ChatSession {
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
        self.ensure_session(&mut inner, chat_id).clone()
    }

    pub fn list_chat_ids(&self) -> Vec<i64> {
        let inner = self.inner.lock();
        let mut ids: Vec<i64> = inner.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Store a message, replacing any earlier copy with the same id.
    pub fn append_message(&self, msg: Message) {
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
        let chat_id = msg.chat_id;
        let line = match serde_json::to_string(&msg) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(chat_id, message_id = msg.message_id, error = %e, "cannot encode message");
                return;
            }
        };
        self.ensure_session(&mut inner, chat_id)
            .messages
            .insert(msg.message_id, msg);
        self.persist_line(&mut inner, chat_id, line);
    }

    /// Flag a message as needing no reply on its own. Returns false if the
    /// message is unknown.
    pub fn set_suppressed(&self, chat_id: i64, message_id: i64) -> bool {
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
        let Some(msg) = inner
            .sessions
            .get_mut(&chat_id)
            .and_then(|s| s.messages.get_mut(&message_id))
        else {
            return false;
        };
        if msg.suppressed {
            return true;
        }
        msg.suppressed = true;
        match serde_json::to_string(msg) {
            Ok(line) => self.persist_line(&mut inner, chat_id, line),
            Err(e) => tracing::error!(chat_id, message_id, error = %e, "cannot encode message"),
        }
        true
    }

    /// Merge `update` into the chat's memory and persist the snapshot.
    pub fn update_memory(&self, chat_id: i64, update: MemoryRecord) {
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
        self.ensure_session(&mut inner, chat_id).memory.merge(update);
        self.persist_snapshot(&mut inner, chat_id);
    }

    /// Move the distillation cursor forward. Never moves it backwards.
    pub fn advance_distillation_cursor(&self, chat_id: i64, message_id: i64) {
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
        let session = self.ensure_session(&mut inner, chat_id);
        if message_id <= session.last_distilled_message_id {
            return;
        }
        session.last_distilled_message_id = message_id;
        self.persist_cursor(&mut inner, chat_id);
    }

    /// Last `n` messages in ascending id order.
    pub fn recent_messages(&self, chat_id: i64, n: usize) -> Vec<Message> {
        let inner = self.inner.lock();
        inner
            .sessions
            .get(&chat_id)
            .map(|s| s.recent(n))
            .unwrap_or_default()
    }

    pub fn view(&self, chat_id: i64, n: usize) -> Option<SessionView> {
        let inner = self.inner.lock();
        inner.sessions.get(&chat_id).map(|s| SessionView {
            chat_id,
            recent: s.recent(n),
            memory: s.memory.clone(),
            last_distilled_message_id: s.last_distilled_message_id,
        })
    }

    pub fn summary(&self, chat_id: i64) -> Option<SessionSummary> {
        let inner = self.inner.lock();
        inner.sessions.get(&chat_id).map(|s| SessionSummary {
            chat_id,
            message_count: s.messages.len(),
            newest_message_id: s.newest_message_id(),
            last_distilled_message_id: s.last_distilled_message_id,
            quota: s.quota.clone(),
            memory: s.memory.clone(),
        })
    }

    /// Atomic check-and-increment of today's budget.
    pub fn try_consume_daily_quota(&self, chat_id: i64) -> bool {
        self.try_consume_daily_quota_on(chat_id, Local::now().date_naive())
    }

    pub fn try_consume_daily_quota_on(&self, chat_id: i64, today: NaiveDate) -> bool {
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
        let quota = &mut self.ensure_session(&mut inner, chat_id).quota;
        let allowed = quota.try_consume(today);
        let (count, limit) = (quota.count, quota.limit);
        if allowed {
            tracing::debug!(chat_id, count, limit, "daily quota consumed");
        } else {
            tracing::info!(chat_id, count, limit, "daily quota exhausted");
        }
        // The date may have rolled over even when denied, so persist either way.
        self.persist_snapshot(&mut inner, chat_id);
        allowed
    }

    /// Whether a reply could be paid for today, without spending anything.
    pub fn has_daily_quota(&self, chat_id: i64) -> bool {
        self.has_daily_quota_on(chat_id, Local::now().date_naive())
    }

    pub fn has_daily_quota_on(&self, chat_id: i64, today: NaiveDate) -> bool {
        let inner = self.inner.lock();
        match inner.sessions.get(&chat_id) {
            Some(session) => session.quota.is_available(today),
            None => self.default_limit > 0,
        }
    }

    /// Next `getUpdates` offset (last handled update id + 1), or 0 if none
    /// was recorded.
    pub fn load_update_offset(&self) -> i64 {
        let path = self.base_path.join(OFFSET_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => raw.trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub fn save_update_offset(&self, offset: i64) {
        if self.read_only {
            return;
        }
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
        if let Err(e) = write_scalar(&self.base_path.join(OFFSET_FILE), offset) {
            tracing::warn!(offset, error = %e, "failed to persist update offset, will retry");
            inner.pending.offset = Some(offset);
        }
    }

    /// Number of writes waiting for retry.
    pub fn pending_write_count(&self) -> usize {
        let inner = self.inner.lock();
        let p = &inner.pending;
        p.lines.len() + p.snapshots.len() + p.cursors.len() + usize::from(p.offset.is_some())
    }

    /// Retry queued writes now; used on shutdown.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        self.flush_pending(&mut inner);
    }

    fn ensure_session<'a>(&self, inner: &'a mut StoreInner, chat_id: i64) -> &'a mut ChatSession {
        if !inner.sessions.contains_key(&chat_id) {
            let session = ChatSession::new(chat_id, self.default_limit);
            inner.sessions.insert(chat_id, session);
            tracing::info!(chat_id, "new chat session");
            self.persist_snapshot(inner, chat_id);
        }
        inner
            .sessions
            .entry(chat_id)
            .or_insert_with(|| ChatSession::new(chat_id, self.default_limit))
    }

    fn persist_line(&self, inner: &mut StoreInner, chat_id: i64, line: String) {
        if self.read_only {
            return;
        }
        // Keep log order: never write ahead of lines still queued for this chat.
        if inner.pending.has_lines_for(chat_id) {
            inner.pending.lines.push((chat_id, line));
            return;
        }
        if let Err(e) = append_line(&self.chat_dir(chat_id), &line) {
            tracing::warn!(chat_id, error = %e, "failed to append chat log, will retry");
            inner.pending.lines.push((chat_id, line));
        }
    }

    fn persist_snapshot(&self, inner: &mut StoreInner, chat_id: i64) {
        if self.read_only {
            return;
        }
        let Some(session) = inner.sessions.get(&chat_id) else {
            return;
        };
        if let Err(e) = write_snapshot(&self.chat_dir(chat_id), session) {
            tracing::warn!(chat_id, error = %e, "failed to write snapshot, will retry");
            inner.pending.snapshots.insert(chat_id);
        }
    }

    fn persist_cursor(&self, inner: &mut StoreInner, chat_id: i64) {
        if self.read_only {
            return;
        }
        let Some(session) = inner.sessions.get(&chat_id) else {
            return;
        };
        let path = self.chat_dir(chat_id).join(CURSOR_FILE);
        if let Err(e) = write_scalar(&path, session.last_distilled_message_id) {
            tracing::warn!(chat_id, error = %e, "failed to write cursor, will retry");
            inner.pending.cursors.insert(chat_id);
        }
    }

    fn flush_pending(&self, inner: &mut StoreInner) {
        if inner.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut inner.pending);
        let before = pending.lines.len() + pending.snapshots.len() + pending.cursors.len();

        // Lines are retried in order; after the first failure for a chat,
        // the rest of that chat's lines stay queued behind it.
        let mut blocked = BTreeSet::new();
        for (chat_id, line) in pending.lines {
            if blocked.contains(&chat_id) {
                inner.pending.lines.push((chat_id, line));
                continue;
            }
            if append_line(&self.chat_dir(chat_id), &line).is_err() {
                blocked.insert(chat_id);
                inner.pending.lines.push((chat_id, line));
            }
        }
        for chat_id in pending.snapshots {
            self.persist_snapshot(inner, chat_id);
        }
        for chat_id in pending.cursors {
            self.persist_cursor(inner, chat_id);
        }
        if let Some(offset) = pending.offset {
            if write_scalar(&self.base_path.join(OFFSET_FILE), offset).is_err() {
                inner.pending.offset = Some(offset);
            }
        }

        let after = inner.pending.lines.len()
            + inner.pending.snapshots.len()
            + inner.pending.cursors.len();
        if after < before {
            tracing::info!(recovered = before - after, remaining = after, "retried queued writes");
        }
    }
}

fn append_line(dir: &Path, line: &str) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err(&path))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(line.as_bytes())
        .and_then(|_| writer.write_all(b"\n"))
        .and_then(|_| writer.flush())
        .map_err(io_err(&path))
}

/// `Ok(None)` only when the file does not exist.
fn read_snapshot(path: &Path) -> Result<Option<SnapshotFile>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Rename `path` to the first free `<name>.bad`, `<name>.bad.1`, ...
fn set_aside(path: &Path) -> Result<PathBuf, StoreError> {
    let mut target = path.with_extension(format!("json.{SET_ASIDE_SUFFIX}"));
    let mut n = 0;
    while target.exists() {
        n += 1;
        target = path.with_extension(format!("json.{SET_ASIDE_SUFFIX}.{n}"));
    }
    fs::rename(path, &target).map_err(io_err(path))?;
    Ok(target)
}

fn write_snapshot(dir: &Path, session: &ChatSession) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join(SNAPSHOT_FILE);
    let temp_path = path.with_extension("json.tmp");
    {
        let file = File::create(&temp_path).map_err(io_err(&temp_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(
            &mut writer,
            &SnapshotFile {
                memory: session.memory.clone(),
                quota: session.quota.clone(),
            },
        )?;
        writer.flush().map_err(io_err(&temp_path))?;
    }
    fs::rename(&temp_path, &path).map_err(io_err(&path))
}

fn write_scalar(path: &Path, value: i64) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
    }
    let temp_path = path.with_extension("txt.tmp");
    fs::write(&temp_path, value.to_string()).map_err(io_err(&temp_path))?;
    fs::rename(&temp_path, path).map_err(io_err(path))
}
