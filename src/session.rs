//! Connection session: request correlation, response cache, and the
//! high-level watch operations
//!
//! The watch never tags responses with request ids; correlation relies on
//! the register key being symmetric between a GET payload and the
//! notification answering it. Each in-flight request sits in a FIFO queue
//! under its key, and an arriving notification completes the oldest
//! request waiting for that key. Everything read is cached for the life of
//! the connection, with single-flight de-duplication so concurrent reads
//! of one register cost one BLE round-trip.

use crate::codec::{
    self, Alarm, Event, EventTime, Settings, TimeAdjustment, WatchCondition, MAX_REMINDERS,
};
use crate::notifications::{encode_notification_packet, xor_buffer, AppNotification};
use crate::progress::{ProgressEvent, ProgressEvents};
use crate::registers::{to_hex, RegisterKey, RegisterTag};
use crate::timesync;
use crate::transport::{Transport, WriteMode};
use crate::types::{GShockError, Result, WatchButton};
use crate::watch_info::WatchInfo;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The factory-reset app-information blob. Seeing it means the watch has
/// forgotten its pairing; writing the magic value back stops it from
/// re-entering pairing mode on every connect.
const APP_INFO_RESET_HEX: &str = "22FFFFFFFFFFFFFFFFFFFF00";
const APP_INFO_MAGIC: [u8; 12] = [
    0x22, 0x34, 0x88, 0xf4, 0xe5, 0xd5, 0xaf, 0xc8, 0x29, 0xe0, 0x6d, 0x02,
];

/// A decoded register value, typed per register family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseValue {
    Text(String),
    Seconds(u32),
    Alarms(Vec<Alarm>),
    ReminderTitle(Option<String>),
    ReminderTime(Option<EventTime>),
    Settings(Settings),
    Condition(WatchCondition),
    Button(WatchButton),
    TimeAdjustment(TimeAdjustment),
    Raw(Vec<u8>),
}

struct PendingRequest {
    key: RegisterKey,
    tx: oneshot::Sender<ResponseValue>,
}

/// Partial alarm state while waiting for both alarm packets
#[derive(Default)]
struct AlarmAssembly {
    primary: Option<Vec<Alarm>>,
    secondary: Option<Vec<Alarm>>,
}

#[derive(Default)]
struct SessionState {
    pending: VecDeque<PendingRequest>,
    cache: HashMap<RegisterKey, ResponseValue>,
    raw_records: HashMap<RegisterKey, Vec<u8>>,
    fetch_locks: HashMap<RegisterKey, Arc<Mutex<()>>>,
    alarm_assembly: Option<AlarmAssembly>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a single register read may wait for its notification
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// All state for one watch connection. Dropped or [`reset`](Self::reset)
/// on disconnect; nothing survives into the next connection.
pub struct ConnectionSession {
    transport: Arc<dyn Transport>,
    watch_info: WatchInfo,
    config: SessionConfig,
    state: Mutex<SessionState>,
    progress: ProgressEvents,
}

impl ConnectionSession {
    pub fn new(transport: Arc<dyn Transport>, watch_info: WatchInfo) -> Self {
        Self::with_config(transport, watch_info, SessionConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        watch_info: WatchInfo,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            watch_info,
            config,
            state: Mutex::new(SessionState::default()),
            progress: ProgressEvents::new(),
        }
    }

    pub fn watch_info(&self) -> &WatchInfo {
        &self.watch_info
    }

    pub fn progress_events(&self) -> &ProgressEvents {
        &self.progress
    }

    /// Feed one notification payload from the BLE layer into the session.
    ///
    /// Decodes the register value, completes the oldest request waiting on
    /// the derived key, and remembers the raw record for read-modify-write
    /// operations. Unsolicited notifications are logged and kept; they
    /// still warm the raw-record store.
    pub async fn on_notification(&self, raw: &[u8]) -> Result<()> {
        let key = RegisterKey::from_response(raw)?;
        let tag = RegisterTag::from_u8(raw[0])?;
        debug!("Notification for {key}: {}", to_hex(raw));

        let value = match tag {
            RegisterTag::BleFeatures => ResponseValue::Button(codec::decode_pressed_button(raw)),
            RegisterTag::SettingForBle => {
                ResponseValue::TimeAdjustment(codec::decode_time_adjustment(raw)?)
            }
            RegisterTag::BasicSettings => ResponseValue::Settings(codec::decode_settings(raw)?),
            RegisterTag::AlarmPrimary | RegisterTag::AlarmSecondary => {
                return self.on_alarm_packet(tag, raw).await;
            }
            RegisterTag::Timer => ResponseValue::Seconds(codec::decode_timer(raw)?),
            RegisterTag::WatchName => ResponseValue::Text(codec::decode_watch_name(raw)?),
            RegisterTag::WatchCondition => {
                ResponseValue::Condition(codec::decode_watch_condition(raw)?)
            }
            RegisterTag::ReminderTitle => {
                ResponseValue::ReminderTitle(codec::decode_reminder_title(raw)?)
            }
            RegisterTag::ReminderTime => {
                ResponseValue::ReminderTime(codec::decode_reminder_time(raw)?)
            }
            RegisterTag::AppInformation => {
                self.handle_app_info(raw).await?;
                ResponseValue::Raw(raw.to_vec())
            }
            RegisterTag::CurrentTime
            | RegisterTag::DstWatchState
            | RegisterTag::DstSetting
            | RegisterTag::WorldCities => ResponseValue::Raw(raw.to_vec()),
        };

        let mut state = self.state.lock().await;
        state.raw_records.insert(key.clone(), raw.to_vec());
        Self::complete(&mut state, &key, value);
        Ok(())
    }

    /// Alarms span two packets; the read completes only once both have
    /// arrived, under the primary-alarm key
    async fn on_alarm_packet(&self, tag: RegisterTag, raw: &[u8]) -> Result<()> {
        let alarms = codec::decode_alarm_packet(raw)?;
        let mut state = self.state.lock().await;
        state
            .raw_records
            .insert(RegisterKey::for_tag(tag), raw.to_vec());

        let assembly = state.alarm_assembly.get_or_insert_with(AlarmAssembly::default);
        match tag {
            RegisterTag::AlarmPrimary => assembly.primary = Some(alarms),
            _ => assembly.secondary = Some(alarms),
        }
        if assembly.primary.is_some() && assembly.secondary.is_some() {
            let assembly = state.alarm_assembly.take().unwrap_or_default();
            let mut all = assembly.primary.unwrap_or_default();
            all.extend(assembly.secondary.unwrap_or_default());
            Self::complete(
                &mut state,
                &RegisterKey::for_tag(RegisterTag::AlarmPrimary),
                ResponseValue::Alarms(all),
            );
        }
        Ok(())
    }

    async fn handle_app_info(&self, raw: &[u8]) -> Result<()> {
        if to_hex(raw) == APP_INFO_RESET_HEX {
            debug!("App info is factory-reset, writing pairing magic back");
            self.transport.write(WriteMode::Set, &APP_INFO_MAGIC).await?;
        }
        Ok(())
    }

    fn complete(state: &mut SessionState, key: &RegisterKey, value: ResponseValue) {
        let position = state.pending.iter().position(|p| &p.key == key);
        match position {
            Some(index) => {
                if let Some(request) = state.pending.remove(index) {
                    // receiver may have timed out and gone away
                    let _ = request.tx.send(value);
                }
            }
            None => warn!("Unsolicited notification for {key}, no request waiting"),
        }
    }

    /// One register read: enqueue the waiter, send the GET, and wait for
    /// the matching notification or the per-request timeout
    async fn fetch(&self, key: RegisterKey) -> Result<ResponseValue> {
        let rx = self.enqueue(key.clone()).await;
        if let Err(e) = self.transport.write(WriteMode::Get, &key.to_bytes()).await {
            self.remove_pending(&key).await;
            return Err(e);
        }
        self.await_response(key, rx).await
    }

    /// The waiter must be queued before the GET goes out, so a fast
    /// response cannot arrive with nobody listening
    async fn enqueue(&self, key: RegisterKey) -> oneshot::Receiver<ResponseValue> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        state.pending.push_back(PendingRequest { key, tx });
        rx
    }

    async fn await_response(
        &self,
        key: RegisterKey,
        rx: oneshot::Receiver<ResponseValue>,
    ) -> Result<ResponseValue> {
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(GShockError::ConnectionLost),
            Err(_) => {
                self.remove_pending(&key).await;
                warn!("No response for {key} within {:?}", self.config.request_timeout);
                Err(GShockError::NoResponse(key.as_str().to_string()))
            }
        }
    }

    async fn remove_pending(&self, key: &RegisterKey) {
        let mut state = self.state.lock().await;
        if let Some(index) = state.pending.iter().position(|p| &p.key == key) {
            state.pending.remove(index);
        }
    }

    /// Cached read with single-flight de-duplication: concurrent callers
    /// for one key share a single BLE round-trip
    async fn cached(&self, key: RegisterKey) -> Result<ResponseValue> {
        let lock = {
            let mut state = self.state.lock().await;
            state.fetch_locks.entry(key.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        if let Some(value) = self.state.lock().await.cache.get(&key) {
            return Ok(value.clone());
        }
        let value = self.fetch(key.clone()).await?;
        self.state.lock().await.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Like [`cached`](Self::cached) for alarms, which need two GETs and
    /// complete jointly under the primary key
    async fn cached_alarms(&self) -> Result<ResponseValue> {
        let key = RegisterKey::for_tag(RegisterTag::AlarmPrimary);
        let lock = {
            let mut state = self.state.lock().await;
            state.fetch_locks.entry(key.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        if let Some(value) = self.state.lock().await.cache.get(&key) {
            return Ok(value.clone());
        }

        let rx = self.enqueue(key.clone()).await;
        for tag in [RegisterTag::AlarmPrimary, RegisterTag::AlarmSecondary] {
            if let Err(e) = self
                .transport
                .write(WriteMode::Get, &RegisterKey::for_tag(tag).to_bytes())
                .await
            {
                self.remove_pending(&key).await;
                return Err(e);
            }
        }
        let value = self.await_response(key.clone(), rx).await?;
        self.state.lock().await.cache.insert(key, value.clone());
        Ok(value)
    }

    pub(crate) async fn invalidate(&self, keys: &[RegisterKey]) {
        let mut state = self.state.lock().await;
        for key in keys {
            state.cache.remove(key);
            state.raw_records.remove(key);
        }
    }

    /// Forget everything tied to the finished connection. Waiters still
    /// in flight resolve with [`GShockError::ConnectionLost`].
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state.cache.clear();
        state.raw_records.clear();
        state.fetch_locks.clear();
        state.alarm_assembly = None;
    }

    // -- internal accessors used by the time-sync flow ---------------------

    pub(crate) async fn fetch_raw(&self, key: RegisterKey) -> Result<Vec<u8>> {
        match self.fetch(key.clone()).await? {
            ResponseValue::Raw(raw) => Ok(raw),
            other => Err(GShockError::UnexpectedValue(format!(
                "expected raw record for {key}, got {other:?}"
            ))),
        }
    }

    pub(crate) async fn write(&self, mode: WriteMode, payload: &[u8]) -> Result<()> {
        debug!("Write ({mode:?}): {}", to_hex(payload));
        self.transport.write(mode, payload).await
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        self.progress.emit(event);
    }

    // -- watch operations ---------------------------------------------------

    pub async fn get_pressed_button(&self) -> Result<WatchButton> {
        match self.cached(RegisterKey::for_tag(RegisterTag::BleFeatures)).await? {
            ResponseValue::Button(button) => Ok(button),
            other => Err(unexpected("button", &other)),
        }
    }

    pub async fn get_watch_name(&self) -> Result<String> {
        match self.cached(RegisterKey::for_tag(RegisterTag::WatchName)).await? {
            ResponseValue::Text(name) => Ok(name),
            other => Err(unexpected("watch name", &other)),
        }
    }

    /// The app-information blob as uppercase hex. Reading it also triggers
    /// the pairing write-back if the watch reports a factory reset.
    pub async fn get_app_info(&self) -> Result<String> {
        match self.cached(RegisterKey::for_tag(RegisterTag::AppInformation)).await? {
            ResponseValue::Raw(raw) => Ok(to_hex(&raw)),
            other => Err(unexpected("app info", &other)),
        }
    }

    pub async fn get_watch_condition(&self) -> Result<WatchCondition> {
        match self.cached(RegisterKey::for_tag(RegisterTag::WatchCondition)).await? {
            ResponseValue::Condition(condition) => Ok(condition),
            other => Err(unexpected("watch condition", &other)),
        }
    }

    pub async fn get_battery_level(&self) -> Result<u8> {
        Ok(self.get_watch_condition().await?.battery_percent)
    }

    pub async fn get_timer(&self) -> Result<u32> {
        match self.cached(RegisterKey::for_tag(RegisterTag::Timer)).await? {
            ResponseValue::Seconds(seconds) => Ok(seconds),
            other => Err(unexpected("timer", &other)),
        }
    }

    pub async fn set_timer(&self, total_seconds: u32) -> Result<()> {
        let payload = codec::encode_timer(total_seconds)?;
        self.invalidate(&[RegisterKey::for_tag(RegisterTag::Timer)]).await;
        self.write(WriteMode::Set, &payload).await
    }

    pub async fn get_alarms(&self) -> Result<Vec<Alarm>> {
        match self.cached_alarms().await? {
            ResponseValue::Alarms(alarms) => Ok(alarms),
            other => Err(unexpected("alarms", &other)),
        }
    }

    /// Write the full alarm set: the first alarm as the primary packet,
    /// the rest as one secondary packet
    pub async fn set_alarms(&self, alarms: &[Alarm]) -> Result<()> {
        if alarms.len() != self.watch_info.alarm_count as usize {
            return Err(GShockError::InvalidArgument(format!(
                "expected {} alarms, got {}",
                self.watch_info.alarm_count,
                alarms.len()
            )));
        }
        self.invalidate(&[RegisterKey::for_tag(RegisterTag::AlarmPrimary)]).await;
        self.write(WriteMode::Set, &codec::encode_primary_alarm(&alarms[0])).await?;
        self.write(WriteMode::Set, &codec::encode_secondary_alarms(&alarms[1..])).await
    }

    /// Read one reminder slot (1-based). Both sub-registers are fetched
    /// concurrently; an empty slot comes back as `None`.
    pub async fn get_event(&self, slot: u8) -> Result<Option<Event>> {
        self.check_reminder_slot(slot)?;
        let title_key = RegisterKey::for_slot(RegisterTag::ReminderTitle, slot);
        let time_key = RegisterKey::for_slot(RegisterTag::ReminderTime, slot);
        let (title, time) = tokio::join!(self.cached(title_key), self.cached(time_key));

        let title = match title? {
            ResponseValue::ReminderTitle(title) => title,
            other => return Err(unexpected("reminder title", &other)),
        };
        let time = match time? {
            ResponseValue::ReminderTime(time) => time,
            other => return Err(unexpected("reminder time", &other)),
        };
        Ok(match (title, time) {
            (Some(title), Some(time)) => Some(Event {
                title,
                time,
                incompatible: false,
                selected: false,
            }),
            _ => None,
        })
    }

    /// Read all reminder slots, skipping empty ones
    pub async fn get_events(&self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for slot in 1..=MAX_REMINDERS as u8 {
            if let Some(event) = self.get_event(slot).await? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Write the reminder set: enabled reminders first, then disabled,
    /// truncated to the watch's capacity and padded with empty slots
    pub async fn set_events(&self, events: &[Event]) -> Result<()> {
        if !self.watch_info.has_reminders {
            return Err(GShockError::InvalidArgument(
                "watch model has no reminders".to_string(),
            ));
        }
        let mut ordered: Vec<&Event> = events.iter().filter(|e| e.time.enabled).collect();
        ordered.extend(events.iter().filter(|e| !e.time.enabled));
        if ordered.len() > MAX_REMINDERS {
            warn!("Truncating {} reminders to {MAX_REMINDERS}", ordered.len());
            ordered.truncate(MAX_REMINDERS);
        }
        let empty = Event::empty();
        while ordered.len() < MAX_REMINDERS {
            ordered.push(&empty);
        }

        for (index, event) in ordered.iter().enumerate() {
            let slot = index as u8 + 1;
            self.invalidate(&[
                RegisterKey::for_slot(RegisterTag::ReminderTitle, slot),
                RegisterKey::for_slot(RegisterTag::ReminderTime, slot),
            ])
            .await;
            self.write(WriteMode::Set, &codec::encode_reminder_title(slot, &event.title))
                .await?;
            self.write(WriteMode::Set, &codec::encode_reminder_time(slot, &event.time))
                .await?;
        }
        Ok(())
    }

    /// Overwrite every reminder slot with zero-filled title and time
    /// records, the form the watch shows as an unused slot
    pub async fn clear_events(&self) -> Result<()> {
        if !self.watch_info.has_reminders {
            return Err(GShockError::InvalidArgument(
                "watch model has no reminders".to_string(),
            ));
        }
        for slot in 1..=MAX_REMINDERS as u8 {
            self.invalidate(&[
                RegisterKey::for_slot(RegisterTag::ReminderTitle, slot),
                RegisterKey::for_slot(RegisterTag::ReminderTime, slot),
            ])
            .await;
            let mut title = vec![RegisterTag::ReminderTitle.code(), slot];
            title.resize(2 + codec::REMINDER_TITLE_LEN, 0);
            self.write(WriteMode::Set, &title).await?;
            let mut time = vec![RegisterTag::ReminderTime.code(), slot];
            time.resize(11, 0);
            self.write(WriteMode::Set, &time).await?;
        }
        Ok(())
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        match self.cached(RegisterKey::for_tag(RegisterTag::BasicSettings)).await? {
            ResponseValue::Settings(settings) => Ok(settings),
            other => Err(unexpected("settings", &other)),
        }
    }

    /// Write settings back. Extended-layout models are patched over the
    /// last record read, so fields this engine does not model survive.
    pub async fn set_settings(&self, settings: &Settings) -> Result<()> {
        let key = RegisterKey::for_tag(RegisterTag::BasicSettings);
        let payload = if self.watch_info.has_extended_settings {
            let record = self.last_raw_or_fetch(&key).await?;
            codec::patch_settings_extended(&record, settings)?
        } else {
            codec::encode_settings(settings)
        };
        self.invalidate(&[key]).await;
        self.write(WriteMode::Set, &payload).await
    }

    pub async fn get_time_adjustment(&self) -> Result<TimeAdjustment> {
        match self.cached(RegisterKey::for_tag(RegisterTag::SettingForBle)).await? {
            ResponseValue::TimeAdjustment(adjustment) => Ok(adjustment),
            other => Err(unexpected("time adjustment", &other)),
        }
    }

    /// Read-modify-write of the connection-settings record, touching only
    /// the auto-adjust flag and minutes bytes
    pub async fn set_time_adjustment(&self, adjustment: &TimeAdjustment) -> Result<()> {
        if adjustment.minutes_after_hour > 59 {
            return Err(GShockError::InvalidArgument(format!(
                "minutes after hour out of range: {}",
                adjustment.minutes_after_hour
            )));
        }
        let key = RegisterKey::for_tag(RegisterTag::SettingForBle);
        let record = self.last_raw_or_fetch(&key).await?;
        let payload = codec::with_time_adjustment(&record, adjustment)?;
        self.invalidate(&[key]).await;
        self.write(WriteMode::Set, &payload).await
    }

    /// The home city currently shown on the watch (world-city slot 0)
    pub async fn get_home_time(&self) -> Result<String> {
        let key = RegisterKey::for_slot(RegisterTag::WorldCities, 0);
        match self.cached(key).await? {
            ResponseValue::Raw(raw) => codec::decode_world_city(&raw),
            other => Err(unexpected("home time", &other)),
        }
    }

    /// Point world-city slot 0 at the watch city matching an IANA zone.
    /// Only the name register changes; use [`set_time`](Self::set_time)
    /// for a full offset/DST update.
    pub async fn set_home_time(&self, zone_id: &str) -> Result<()> {
        let zone = crate::timezone::find_time_zone(zone_id, Utc::now())?;
        let key = RegisterKey::for_slot(RegisterTag::WorldCities, 0);
        self.invalidate(&[key]).await;
        self.write(WriteMode::Set, &codec::encode_world_city(0, &zone.city))
            .await
    }

    /// Obfuscate and forward a phone notification
    pub async fn send_app_notification(&self, notification: &AppNotification) -> Result<()> {
        let packet = xor_buffer(&encode_notification_packet(notification));
        self.write(WriteMode::Notify, &packet).await
    }

    /// Full time synchronization against the current wall clock
    pub async fn set_time(&self, zone_id: &str) -> Result<()> {
        self.set_time_at(zone_id, Utc::now()).await
    }

    /// Full time synchronization at an explicit instant: DST state records,
    /// per-city DST settings, world cities, then the clock itself
    pub async fn set_time_at(&self, zone_id: &str, now: DateTime<Utc>) -> Result<()> {
        timesync::synchronize(self, zone_id, now).await
    }

    /// The last raw record seen for a key, fetching it if the session has
    /// none yet
    async fn last_raw_or_fetch(&self, key: &RegisterKey) -> Result<Vec<u8>> {
        let known = self.state.lock().await.raw_records.get(key).cloned();
        match known {
            Some(record) => Ok(record),
            None => {
                // the fetch both returns and records the raw bytes
                let _ = self.fetch(key.clone()).await?;
                self.state
                    .lock()
                    .await
                    .raw_records
                    .get(key)
                    .cloned()
                    .ok_or_else(|| {
                        GShockError::UnexpectedValue(format!("no raw record for {key}"))
                    })
            }
        }
    }

    fn check_reminder_slot(&self, slot: u8) -> Result<()> {
        if !self.watch_info.has_reminders {
            return Err(GShockError::InvalidArgument(
                "watch model has no reminders".to_string(),
            ));
        }
        if slot == 0 || slot as usize > MAX_REMINDERS {
            return Err(GShockError::InvalidArgument(format!(
                "reminder slot out of range: {slot}"
            )));
        }
        Ok(())
    }
}

fn unexpected(what: &str, got: &ResponseValue) -> GShockError {
    GShockError::UnexpectedValue(format!("expected {what}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EventDate, RepeatPeriod, Weekdays};
    use crate::watch_info::WatchModel;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records writes; the test injects responses via `on_notification`
    struct FakeTransport {
        writes: StdMutex<Vec<(WriteMode, Vec<u8>)>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: StdMutex::new(Vec::new()),
            })
        }

        fn writes(&self) -> Vec<(WriteMode, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn write(&self, mode: WriteMode, payload: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push((mode, payload.to_vec()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn session(transport: Arc<FakeTransport>) -> Arc<ConnectionSession> {
        Arc::new(ConnectionSession::with_config(
            transport,
            WatchInfo::for_model(WatchModel::Gw5600),
            SessionConfig {
                request_timeout: Duration::from_millis(200),
            },
        ))
    }

    /// Run `op` while a pump task answers each GET with the canned
    /// response for its register key
    async fn with_responses<F, T>(
        transport: Arc<FakeTransport>,
        session: Arc<ConnectionSession>,
        responses: Vec<Vec<u8>>,
        op: F,
    ) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let pump = {
            let session = session.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                let mut remaining = responses;
                let mut answered = 0;
                while !remaining.is_empty() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    let gets: Vec<Vec<u8>> = transport
                        .writes()
                        .into_iter()
                        .filter(|(mode, _)| *mode == WriteMode::Get)
                        .map(|(_, p)| p)
                        .collect();
                    while answered < gets.len() {
                        let wanted = RegisterKey::from_response(&gets[answered]).unwrap();
                        if let Some(index) = remaining
                            .iter()
                            .position(|r| RegisterKey::from_response(r).unwrap() == wanted)
                        {
                            let response = remaining.remove(index);
                            session.on_notification(&response).await.unwrap();
                        }
                        answered += 1;
                    }
                }
            })
        };
        let result = op.await;
        pump.abort();
        result
    }

    #[test]
    fn test_default_request_timeout() {
        assert_eq!(SessionConfig::default().request_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timer_read_end_to_end() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let seconds = with_responses(
            transport.clone(),
            session.clone(),
            vec![vec![0x18, 0, 3, 0, 0, 0, 0]],
            session.get_timer(),
        )
        .await
        .unwrap();
        assert_eq!(seconds, 180);
        assert_eq!(transport.writes()[0], (WriteMode::Get, vec![0x18]));
    }

    #[tokio::test]
    async fn test_cache_answers_second_read_without_io() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let first = with_responses(
            transport.clone(),
            session.clone(),
            vec![vec![0x18, 0, 5, 0, 0, 0, 0]],
            session.get_timer(),
        )
        .await
        .unwrap();
        let writes_after_first = transport.writes().len();

        // no pump running: a second BLE read would hang
        let second = session.get_timer().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.writes().len(), writes_after_first);
    }

    #[tokio::test]
    async fn test_set_timer_invalidates_cache() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        with_responses(
            transport.clone(),
            session.clone(),
            vec![vec![0x18, 0, 3, 0, 0, 0, 0]],
            session.get_timer(),
        )
        .await
        .unwrap();

        session.set_timer(600).await.unwrap();
        assert!(transport
            .writes()
            .contains(&(WriteMode::Set, vec![0x18, 0, 10, 0, 0, 0, 0])));

        let refreshed = with_responses(
            transport.clone(),
            session.clone(),
            vec![vec![0x18, 0, 10, 0, 0, 0, 0]],
            session.get_timer(),
        )
        .await
        .unwrap();
        assert_eq!(refreshed, 600);
    }

    #[tokio::test]
    async fn test_request_times_out_without_response() {
        let transport = FakeTransport::new();
        let session = session(transport);
        let result = session.get_timer().await;
        assert!(matches!(result, Err(GShockError::NoResponse(_))));
    }

    #[tokio::test]
    async fn test_requests_complete_fifo_per_key() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let first = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .fetch(RegisterKey::for_tag(RegisterTag::Timer))
                    .await
            })
        };
        let second = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .fetch(RegisterKey::for_tag(RegisterTag::Timer))
                    .await
            })
        };
        // let both GETs go out before answering
        tokio::time::sleep(Duration::from_millis(20)).await;
        session
            .on_notification(&[0x18, 0, 1, 0, 0, 0, 0])
            .await
            .unwrap();
        session
            .on_notification(&[0x18, 0, 2, 0, 0, 0, 0])
            .await
            .unwrap();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, ResponseValue::Seconds(60));
        assert_eq!(second, ResponseValue::Seconds(120));
    }

    #[tokio::test]
    async fn test_distinct_keys_resolve_out_of_order() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let city = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .fetch(RegisterKey::for_slot(RegisterTag::WorldCities, 0))
                    .await
            })
        };
        let condition = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .fetch(RegisterKey::for_tag(RegisterTag::WatchCondition))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // answer in the opposite order of issue
        session
            .on_notification(&[0x28, 0x10, 0x0f, 0x00])
            .await
            .unwrap();
        let mut record = vec![0x1f, 0x00];
        record.extend_from_slice(b"TOKYO");
        record.resize(20, 0);
        session.on_notification(&record).await.unwrap();

        assert_eq!(city.await.unwrap().unwrap(), ResponseValue::Raw(record));
        assert_eq!(
            condition.await.unwrap().unwrap(),
            ResponseValue::Condition(WatchCondition {
                battery_percent: 100,
                temperature: 0
            })
        );
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.get_timer().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        session
            .on_notification(&[0x18, 0, 3, 0, 0, 0, 0])
            .await
            .unwrap();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 180);
        }
        let gets = transport
            .writes()
            .iter()
            .filter(|(mode, _)| *mode == WriteMode::Get)
            .count();
        assert_eq!(gets, 1);
    }

    #[tokio::test]
    async fn test_unsolicited_notification_is_dropped() {
        let transport = FakeTransport::new();
        let session = session(transport);
        session
            .on_notification(&[0x18, 0, 9, 0, 0, 0, 0])
            .await
            .unwrap();
        // the value must not satisfy a later request
        assert!(session.get_timer().await.is_err());
    }

    #[tokio::test]
    async fn test_alarms_need_both_packets() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let read = {
            let session = session.clone();
            tokio::spawn(async move { session.get_alarms().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // both GETs must already be on the wire
        assert_eq!(
            transport
                .writes()
                .iter()
                .filter(|(mode, _)| *mode == WriteMode::Get)
                .count(),
            2
        );

        session
            .on_notification(&[0x15, 0x40, 0x40, 6, 30])
            .await
            .unwrap();
        // still incomplete
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!read.is_finished());

        session
            .on_notification(&[
                0x16, 0x00, 0x40, 7, 0, 0x40, 0x40, 8, 15, 0x00, 0x40, 9, 30, 0x80, 0x40, 10, 45,
            ])
            .await
            .unwrap();

        let alarms = read.await.unwrap().unwrap();
        assert_eq!(alarms.len(), 5);
        assert_eq!(alarms[0], Alarm::new(6, 30, true, false).unwrap());
        assert!(!alarms[1].enabled);
        assert_eq!(alarms[4], Alarm::new(10, 45, false, true).unwrap());
    }

    #[tokio::test]
    async fn test_set_alarms_sends_two_packets() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let alarms = vec![
            Alarm::new(6, 30, true, false).unwrap(),
            Alarm::new(7, 0, false, false).unwrap(),
            Alarm::new(8, 0, false, false).unwrap(),
            Alarm::new(9, 0, false, false).unwrap(),
            Alarm::new(10, 0, false, false).unwrap(),
        ];
        session.set_alarms(&alarms).await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1[0], 0x15);
        assert_eq!(writes[0].1.len(), 5);
        assert_eq!(writes[1].1[0], 0x16);
        assert_eq!(writes[1].1.len(), 1 + 4 * 4);
    }

    #[tokio::test]
    async fn test_set_alarms_rejects_wrong_count() {
        let transport = FakeTransport::new();
        let session = session(transport);
        let alarms = vec![Alarm::new(6, 30, true, false).unwrap()];
        assert!(session.set_alarms(&alarms).await.is_err());
    }

    #[tokio::test]
    async fn test_get_event_merges_title_and_time() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let mut title = vec![0x30, 0x02];
        title.extend_from_slice(b"Dentist");
        title.resize(20, 0);
        let time = vec![0x31, 0x02, 0x09, 0x23, 0x03, 0x21, 0x23, 0x03, 0x21, 0x00, 0x00];

        let event = with_responses(
            transport.clone(),
            session.clone(),
            vec![title, time],
            session.get_event(2),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(event.title, "Dentist");
        assert!(event.time.enabled);
        assert_eq!(event.time.repeat, RepeatPeriod::Yearly);
        assert_eq!(
            event.time.start,
            EventDate {
                year: 2023,
                month: 3,
                day: 21
            }
        );
    }

    #[tokio::test]
    async fn test_get_event_empty_slot() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let title = vec![0x30, 0x03, 0xff, 0xff];
        let time = vec![0x31, 0x03, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00];
        let event = with_responses(
            transport.clone(),
            session.clone(),
            vec![title, time],
            session.get_event(3),
        )
        .await
        .unwrap();
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_set_events_orders_enabled_first_and_pads() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let disabled = Event {
            title: "Off".to_string(),
            time: EventTime {
                enabled: false,
                repeat: RepeatPeriod::Never,
                start: EventDate {
                    year: 2023,
                    month: 1,
                    day: 1,
                },
                end: EventDate {
                    year: 2023,
                    month: 1,
                    day: 1,
                },
                weekdays: Weekdays::empty(),
            },
            incompatible: false,
            selected: false,
        };
        let enabled = Event {
            title: "On".to_string(),
            time: EventTime {
                enabled: true,
                ..disabled.time
            },
            ..disabled.clone()
        };
        session.set_events(&[disabled, enabled]).await.unwrap();

        let writes = transport.writes();
        // 5 slots, title + time each
        assert_eq!(writes.len(), 10);
        assert_eq!(&writes[0].1[2..4], b"On");
        assert_eq!(&writes[2].1[2..5], b"Off");
        // padding slots carry an empty title
        assert!(writes[4].1[2..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_clear_events_zeroes_all_slots() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        session.clear_events().await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 10);
        assert!(writes.iter().all(|(mode, _)| *mode == WriteMode::Set));
        assert_eq!(writes[0].1.len(), 20);
        assert_eq!(&writes[0].1[..2], &[0x30, 1]);
        assert!(writes[0].1[2..].iter().all(|&b| b == 0));
        assert_eq!(writes[1].1.len(), 11);
        assert_eq!(&writes[1].1[..2], &[0x31, 1]);
        assert!(writes[1].1[2..].iter().all(|&b| b == 0));
        assert_eq!(&writes[8].1[..2], &[0x30, 5]);
    }

    #[tokio::test]
    async fn test_settings_roundtrip_through_session() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let settings = with_responses(
            transport.clone(),
            session.clone(),
            vec![vec![0x13, 0x01, 1, 0, 1, 2, 0, 0, 0, 0, 0, 0]],
            session.get_settings(),
        )
        .await
        .unwrap();
        assert_eq!(settings.time_format, codec::TimeFormat::TwentyFourHour);
        assert_eq!(settings.language, codec::Language::French);

        session.set_settings(&settings).await.unwrap();
        let set = transport
            .writes()
            .into_iter()
            .find(|(mode, p)| *mode == WriteMode::Set && p[0] == 0x13)
            .unwrap();
        assert_eq!(set.1.len(), codec::SETTINGS_SHORT_LEN);
        assert_eq!(set.1[1] & 0x01, 0x01);
    }

    #[tokio::test]
    async fn test_time_adjustment_patches_last_record() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let mut record = vec![0u8; 16];
        record[0] = 0x11;
        record[5] = 0x5a;
        record[12] = 0x80;
        record[13] = 30;
        let adjustment = with_responses(
            transport.clone(),
            session.clone(),
            vec![record.clone()],
            session.get_time_adjustment(),
        )
        .await
        .unwrap();
        assert!(!adjustment.enabled);

        session
            .set_time_adjustment(&TimeAdjustment {
                enabled: true,
                minutes_after_hour: 15,
            })
            .await
            .unwrap();
        let set = transport
            .writes()
            .into_iter()
            .find(|(mode, p)| *mode == WriteMode::Set && p[0] == 0x11)
            .unwrap();
        assert_eq!(set.1[12], 0x00);
        assert_eq!(set.1[13], 15);
        assert_eq!(set.1[5], 0x5a);
    }

    #[tokio::test]
    async fn test_app_info_reset_triggers_write_back() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let reset = vec![
            0x22, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00,
        ];
        session.on_notification(&reset).await.unwrap();
        assert_eq!(
            transport.writes(),
            vec![(WriteMode::Set, APP_INFO_MAGIC.to_vec())]
        );
    }

    #[tokio::test]
    async fn test_app_info_normal_value_no_write_back() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        session
            .on_notification(&APP_INFO_MAGIC)
            .await
            .unwrap();
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_reset_fails_waiters_with_connection_lost() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let read = {
            let session = session.clone();
            tokio::spawn(async move { session.get_timer().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.reset().await;
        assert!(matches!(
            read.await.unwrap(),
            Err(GShockError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_reset_clears_cache() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        with_responses(
            transport.clone(),
            session.clone(),
            vec![vec![0x18, 0, 3, 0, 0, 0, 0]],
            session.get_timer(),
        )
        .await
        .unwrap();
        session.reset().await;
        // the cache is gone, so this read must hit the wire and time out
        assert!(session.get_timer().await.is_err());
    }

    #[tokio::test]
    async fn test_home_time_roundtrip() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());

        let mut record = vec![0x1f, 0x00];
        record.extend_from_slice(b"NEW YORK");
        record.resize(20, 0);
        let city = with_responses(
            transport.clone(),
            session.clone(),
            vec![record],
            session.get_home_time(),
        )
        .await
        .unwrap();
        assert_eq!(city, "NEW YORK");

        session.set_home_time("Asia/Tokyo").await.unwrap();
        let set = transport
            .writes()
            .into_iter()
            .find(|(mode, p)| *mode == WriteMode::Set && p[0] == 0x1f)
            .unwrap();
        assert_eq!(set.1[1], 0);
        assert_eq!(&set.1[2..7], b"TOKYO");
    }

    #[tokio::test]
    async fn test_send_notification_is_obfuscated() {
        let transport = FakeTransport::new();
        let session = session(transport.clone());
        let notification = AppNotification::new(
            crate::notifications::NotificationType::Message,
            "20231002T203950",
            "Messages",
            "Bob",
            "hello",
            "hello there",
        )
        .unwrap();
        session.send_app_notification(&notification).await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, WriteMode::Notify);
        // header 00..01 XORed with 0xFF
        assert_eq!(&writes[0].1[..6], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]);
    }

    #[tokio::test]
    async fn test_reminder_slot_bounds() {
        let transport = FakeTransport::new();
        let session = session(transport);
        assert!(session.get_event(0).await.is_err());
        assert!(session.get_event(6).await.is_err());
    }

    #[tokio::test]
    async fn test_reminders_rejected_on_incapable_model() {
        let transport = FakeTransport::new();
        let session = Arc::new(ConnectionSession::new(
            transport,
            WatchInfo::for_model(WatchModel::B2100),
        ));
        assert!(session.get_event(1).await.is_err());
        assert!(session.set_events(&[]).await.is_err());
    }
}
