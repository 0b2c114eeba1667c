//! In-memory fakes for the pipeline's trait seams

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use envforge_client::{
    BuildInfo, BuildSummary, CiClient, ClientError, JobInfo, JobPath, QueueItem, QueueRef,
    Result as ClientResult, TriggerAck,
};
use envforge_core::domain::build::{BuildParameters, BuildStatus, ENV_NAME};
use envforge_core::domain::environment::DatabaseCredentials;
use envforge_core::domain::record::FieldValue;

use crate::database::{DatabaseConnector, DbError, RecordStore, StoredRow};
use crate::tunnel::{PortAllocator, Tunnel, TunnelBroker, TunnelError};

/// Parameters carrying only `ENV_NAME`
pub fn params(env_name: &str) -> BuildParameters {
    BuildParameters::new(BTreeMap::from([(
        ENV_NAME.to_string(),
        env_name.to_string(),
    )]))
    .unwrap()
}

// ============================================================================
// CI
// ============================================================================

/// A build known to the fake CI server
#[derive(Debug, Clone)]
pub struct FakeCiBuild {
    env_name: String,
    /// Status answers; the last one repeats forever
    statuses: VecDeque<BuildStatus>,
    console: String,
}

impl FakeCiBuild {
    pub fn new(env_name: &str, statuses: &[BuildStatus]) -> Self {
        Self {
            env_name: env_name.to_string(),
            statuses: statuses.iter().copied().collect(),
            console: String::new(),
        }
    }

    pub fn console(mut self, text: &str) -> Self {
        self.console = text.to_string();
        self
    }

    fn next_status(&mut self) -> BuildStatus {
        if self.statuses.len() > 1 {
            self.statuses.pop_front().unwrap()
        } else {
            self.statuses.front().copied().unwrap_or(BuildStatus::Queued)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum QueueBehavior {
    ResolveAfter(usize),
    Never,
    Cancelled,
}

#[derive(Debug)]
struct CiState {
    reachable: bool,
    authorized: bool,
    job_exists: bool,
    reject_triggers: bool,
    builds: BTreeMap<u64, FakeCiBuild>,
    on_trigger: Option<(u64, FakeCiBuild)>,
    triggered: Option<u64>,
    queue: QueueBehavior,
    queue_polls: usize,
    triggers: usize,
    starts_immediately: bool,
    triggered_params: Vec<BTreeMap<String, String>>,
    status_polls: HashMap<u64, usize>,
    status_errors: HashMap<u64, usize>,
}

/// Scripted CI server
pub struct FakeCi {
    state: Mutex<CiState>,
}

impl FakeCi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CiState {
                reachable: true,
                authorized: true,
                job_exists: true,
                reject_triggers: false,
                builds: BTreeMap::new(),
                on_trigger: None,
                triggered: None,
                queue: QueueBehavior::ResolveAfter(1),
                queue_polls: 0,
                triggers: 0,
                starts_immediately: false,
                triggered_params: Vec::new(),
                status_polls: HashMap::new(),
                status_errors: HashMap::new(),
            }),
        }
    }

    pub fn add_build(&self, number: u64, build: FakeCiBuild) {
        self.state.lock().unwrap().builds.insert(number, build);
    }

    /// The build a trigger creates
    pub fn on_trigger(&self, number: u64, build: FakeCiBuild) {
        self.state.lock().unwrap().on_trigger = Some((number, build));
    }

    pub fn queue_resolves_after(&self, polls: usize) {
        self.state.lock().unwrap().queue = QueueBehavior::ResolveAfter(polls);
    }

    pub fn queue_never_resolves(&self) {
        self.state.lock().unwrap().queue = QueueBehavior::Never;
    }

    pub fn queue_cancelled(&self) {
        self.state.lock().unwrap().queue = QueueBehavior::Cancelled;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Makes every request fail with 401 when `false`
    pub fn set_authorized(&self, authorized: bool) {
        self.state.lock().unwrap().authorized = authorized;
    }

    /// Triggers answer with the build number instead of a queue item
    pub fn trigger_starts_build(&self) {
        self.state.lock().unwrap().starts_immediately = true;
    }

    /// The next `count` status polls of `number` fail with 502
    pub fn fail_status_polls(&self, number: u64, count: usize) {
        self.state.lock().unwrap().status_errors.insert(number, count);
    }

    pub fn set_job_exists(&self, exists: bool) {
        self.state.lock().unwrap().job_exists = exists;
    }

    pub fn reject_triggers(&self) {
        self.state.lock().unwrap().reject_triggers = true;
    }

    pub fn trigger_count(&self) -> usize {
        self.state.lock().unwrap().triggers
    }

    /// Parameters of every trigger, in order
    pub fn triggered_params(&self) -> Vec<BTreeMap<String, String>> {
        self.state.lock().unwrap().triggered_params.clone()
    }

    pub fn queue_polls(&self) -> usize {
        self.state.lock().unwrap().queue_polls
    }

    pub fn status_polls(&self, number: u64) -> usize {
        self.state
            .lock()
            .unwrap()
            .status_polls
            .get(&number)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CiClient for FakeCi {
    async fn ping(&self) -> ClientResult<()> {
        let state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(ClientError::Unreachable("connection refused".to_string()));
        }
        if !state.authorized {
            return Err(ClientError::api_error(401, "Invalid password/token"));
        }
        Ok(())
    }

    async fn job_info(&self, job: &JobPath) -> ClientResult<JobInfo> {
        let state = self.state.lock().unwrap();
        if !state.job_exists {
            return Err(ClientError::NotFound(job.to_string()));
        }

        Ok(JobInfo {
            name: job.name().to_string(),
            last_build: state.builds.keys().max().copied(),
            buildable: true,
        })
    }

    async fn trigger_build(&self, job: &JobPath, params: &BuildParameters) -> ClientResult<TriggerAck> {
        let mut state = self.state.lock().unwrap();
        if state.reject_triggers {
            return Err(ClientError::TriggerRejected("status 400: bad parameters".to_string()));
        }
        if !state.job_exists {
            return Err(ClientError::NotFound(job.to_string()));
        }

        state.triggers += 1;
        state.triggered_params.push(params.as_map().clone());
        if let Some((number, build)) = state.on_trigger.take() {
            state.builds.insert(number, build);
            state.triggered = Some(number);
        }

        match state.triggered {
            Some(number) if state.starts_immediately => Ok(TriggerAck::Started(number)),
            _ => Ok(TriggerAck::Queued(QueueRef(1))),
        }
    }

    async fn queue_item(&self, _queue: QueueRef) -> ClientResult<QueueItem> {
        let mut state = self.state.lock().unwrap();
        state.queue_polls += 1;

        let waiting = QueueItem {
            build_number: None,
            cancelled: false,
            reason: Some("Waiting for next available executor".to_string()),
        };

        Ok(match state.queue {
            QueueBehavior::ResolveAfter(polls) if state.queue_polls >= polls => QueueItem {
                build_number: state.triggered,
                cancelled: false,
                reason: None,
            },
            QueueBehavior::ResolveAfter(_) | QueueBehavior::Never => waiting,
            QueueBehavior::Cancelled => QueueItem {
                build_number: None,
                cancelled: true,
                reason: None,
            },
        })
    }

    async fn build_status(&self, job: &JobPath, number: u64) -> ClientResult<BuildInfo> {
        let mut state = self.state.lock().unwrap();
        *state.status_polls.entry(number).or_default() += 1;

        if let Some(remaining) = state.status_errors.get_mut(&number).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(ClientError::api_error(502, "Bad Gateway"));
        }

        let build = state
            .builds
            .get_mut(&number)
            .ok_or_else(|| ClientError::NotFound(format!("{} #{}", job, number)))?;

        Ok(BuildInfo {
            number,
            status: build.next_status(),
        })
    }

    async fn console_text(&self, job: &JobPath, number: u64) -> ClientResult<String> {
        self.state
            .lock()
            .unwrap()
            .builds
            .get(&number)
            .map(|build| build.console.clone())
            .ok_or_else(|| ClientError::NotFound(format!("{} #{}", job, number)))
    }

    async fn recent_builds(&self, _job: &JobPath, limit: usize) -> ClientResult<Vec<BuildSummary>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .builds
            .keys()
            .rev()
            .take(limit)
            .map(|&number| BuildSummary { number, url: None })
            .collect())
    }

    async fn build_parameters(
        &self,
        job: &JobPath,
        number: u64,
    ) -> ClientResult<BTreeMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .builds
            .get(&number)
            .map(|build| BTreeMap::from([(ENV_NAME.to_string(), build.env_name.clone())]))
            .ok_or_else(|| ClientError::NotFound(format!("{} #{}", job, number)))
    }
}

// ============================================================================
// Tunnels
// ============================================================================

/// Hands out consecutive ports
pub struct SequentialPorts {
    next: AtomicU16,
}

impl SequentialPorts {
    pub fn new(first: u16) -> Self {
        Self {
            next: AtomicU16::new(first),
        }
    }
}

impl PortAllocator for SequentialPorts {
    fn allocate(&self) -> Result<u16, TunnelError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    routes: HashMap<u16, Ipv4Addr>,
    failing: HashSet<Ipv4Addr>,
    opened: usize,
    closed: usize,
}

/// Records tunnels instead of spawning processes
#[derive(Debug, Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every open towards `host` fail
    pub fn fail_for(&self, host: Ipv4Addr) {
        self.state.lock().unwrap().failing.insert(host);
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    /// Tunnels currently open
    pub fn open_now(&self) -> usize {
        self.state.lock().unwrap().routes.len()
    }

    /// Remote host behind a local port, while its tunnel is open
    pub fn route(&self, local_port: u16) -> Option<Ipv4Addr> {
        self.state.lock().unwrap().routes.get(&local_port).copied()
    }
}

#[async_trait]
impl TunnelBroker for FakeBroker {
    async fn open(
        &self,
        remote_host: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    ) -> Result<Tunnel, TunnelError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&remote_host) {
            return Err(TunnelError::Exited {
                remote: format!("{}:{}", remote_host, remote_port),
                status: "exit status: 255".to_string(),
                stderr: "Connection refused".to_string(),
            });
        }

        state.opened += 1;
        state.routes.insert(local_port, remote_host);
        Ok(Tunnel::detached(local_port, remote_host, remote_port))
    }

    async fn close(&self, tunnel: &mut Tunnel) {
        if !tunnel.mark_closed() {
            return;
        }

        let mut state = self.state.lock().unwrap();
        state.closed += 1;
        state.routes.remove(&tunnel.local_port);
    }
}

// ============================================================================
// Databases
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, FieldValue>>,
}

/// One in-memory database server
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    pub schemas: Vec<String>,
    pub tables: BTreeMap<String, FakeTable>,
    pub commits: usize,
    pub rollbacks: usize,
    fail_writes: bool,
    snapshot: Option<BTreeMap<String, FakeTable>>,
}

pub type SharedServer = Arc<Mutex<FakeServer>>;

impl FakeServer {
    pub fn with_schema(schema: &str) -> Self {
        Self {
            schemas: vec!["information_schema".to_string(), schema.to_string()],
            ..Self::default()
        }
    }

    pub fn table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables.insert(
            name.to_string(),
            FakeTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        self
    }

    pub fn row(mut self, table: &str, row: BTreeMap<String, FieldValue>) -> Self {
        if let Some(t) = self.tables.get_mut(table) {
            t.rows.push(row);
        }
        self
    }

    /// Makes inserts and updates fail
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn shared(self) -> SharedServer {
        Arc::new(Mutex::new(self))
    }

    pub fn rows(server: &SharedServer, table: &str) -> Vec<BTreeMap<String, FieldValue>> {
        server
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn write_guard(&self) -> Result<(), DbError> {
        if self.fail_writes {
            Err(DbError::Query(sqlx::Error::Protocol(
                "injected write failure".to_string(),
            )))
        } else {
            Ok(())
        }
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut FakeTable, DbError> {
        self.tables
            .get_mut(table)
            .ok_or(DbError::Query(sqlx::Error::RowNotFound))
    }
}

fn matches_key(row: &BTreeMap<String, FieldValue>, key_column: &str, key: &str) -> bool {
    matches!(row.get(key_column), Some(FieldValue::Text(v)) if v == key)
}

/// A connection to a [`FakeServer`]
pub struct FakeStore {
    server: SharedServer,
}

impl FakeStore {
    pub fn new(server: SharedServer) -> Self {
        Self { server }
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn list_tables(&mut self) -> Result<Vec<String>, DbError> {
        Ok(self.server.lock().unwrap().tables.keys().cloned().collect())
    }

    async fn describe(&mut self, table: &str) -> Result<Vec<String>, DbError> {
        let mut server = self.server.lock().unwrap();
        Ok(server.table_mut(table)?.columns.clone())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        let mut server = self.server.lock().unwrap();
        server.snapshot = Some(server.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let mut server = self.server.lock().unwrap();
        server.snapshot = None;
        server.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        let mut server = self.server.lock().unwrap();
        if let Some(tables) = server.snapshot.take() {
            server.tables = tables;
        }
        server.rollbacks += 1;
        Ok(())
    }

    async fn count_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
    ) -> Result<u64, DbError> {
        let mut server = self.server.lock().unwrap();
        let count = server
            .table_mut(table)?
            .rows
            .iter()
            .filter(|row| matches_key(row, key_column, key))
            .count();
        Ok(count as u64)
    }

    async fn insert(
        &mut self,
        table: &str,
        row: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DbError> {
        let mut server = self.server.lock().unwrap();
        server.write_guard()?;
        server.table_mut(table)?.rows.push(row.clone());
        Ok(())
    }

    async fn update_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
        row: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DbError> {
        let mut server = self.server.lock().unwrap();
        server.write_guard()?;
        for existing in server
            .table_mut(table)?
            .rows
            .iter_mut()
            .filter(|r| matches_key(r, key_column, key))
        {
            existing.extend(row.clone());
        }
        Ok(())
    }

    async fn fetch_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
        columns: &[String],
    ) -> Result<Option<StoredRow>, DbError> {
        let mut server = self.server.lock().unwrap();
        let found = server
            .table_mut(table)?
            .rows
            .iter()
            .find(|row| matches_key(row, key_column, key))
            .map(|row| {
                columns
                    .iter()
                    .map(|column| {
                        let value = match row.get(column) {
                            Some(FieldValue::Null) | None => None,
                            Some(value) => Some(value.to_string()),
                        };
                        (column.clone(), value)
                    })
                    .collect()
            });
        Ok(found)
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}

/// Resolves connections through a [`FakeBroker`]'s open tunnels
pub struct FakeConnector {
    broker: Arc<FakeBroker>,
    servers: Mutex<HashMap<Ipv4Addr, SharedServer>>,
    checked: Mutex<Vec<Ipv4Addr>>,
}

impl FakeConnector {
    pub fn new(broker: Arc<FakeBroker>) -> Self {
        Self {
            broker,
            servers: Mutex::new(HashMap::new()),
            checked: Mutex::new(Vec::new()),
        }
    }

    pub fn add_server(&self, host: Ipv4Addr, server: FakeServer) {
        self.servers.lock().unwrap().insert(host, server.shared());
    }

    pub fn server(&self, host: Ipv4Addr) -> Option<SharedServer> {
        self.servers.lock().unwrap().get(&host).cloned()
    }

    /// Hosts whose schemas were listed, in order
    pub fn checked(&self) -> Vec<Ipv4Addr> {
        self.checked.lock().unwrap().clone()
    }

    fn connect(&self, addr: SocketAddr) -> Result<(Ipv4Addr, SharedServer), DbError> {
        let unreachable = DbError::ConnectTimeout {
            addr,
            timeout: Duration::from_secs(10),
        };

        let host = self.broker.route(addr.port()).ok_or(unreachable)?;
        let server = self.server(host).ok_or(DbError::ConnectTimeout {
            addr,
            timeout: Duration::from_secs(10),
        })?;
        Ok((host, server))
    }
}

#[async_trait]
impl DatabaseConnector for FakeConnector {
    async fn list_schemas(
        &self,
        addr: SocketAddr,
        _credentials: &DatabaseCredentials,
    ) -> Result<Vec<String>, DbError> {
        let (host, server) = self.connect(addr)?;
        self.checked.lock().unwrap().push(host);
        let schemas = server.lock().unwrap().schemas.clone();
        Ok(schemas)
    }

    async fn open_store(
        &self,
        addr: SocketAddr,
        _credentials: &DatabaseCredentials,
        schema: &str,
    ) -> Result<Box<dyn RecordStore>, DbError> {
        let (_, server) = self.connect(addr)?;
        if !server.lock().unwrap().schemas.iter().any(|s| s == schema) {
            return Err(DbError::Query(sqlx::Error::RowNotFound));
        }
        Ok(Box::new(FakeStore::new(server)))
    }
}
