//! Time synchronization flow
//!
//! Setting the time is not one write. The watch keeps DST flags, per-city
//! DST parameters, and the world-city names as separate registers, and all
//! of them must agree with the clock value or the watch re-applies its own
//! DST correction on top of ours. The sequence mirrors what the official
//! app does: refresh the DST state records, then the per-city DST settings,
//! then the city names, and only then write the clock.
//!
//! Every record is read first and written back with only the home-clock
//! bytes patched, so firmware fields this engine does not model survive.

use crate::codec::{
    self, encode_current_time, encode_world_city, with_dst_state, with_world_city_dst,
};
use crate::progress::ProgressEvent;
use crate::registers::{RegisterKey, RegisterTag};
use crate::session::ConnectionSession;
use crate::timezone::{find_time_zone, CasioTimeZone};
use crate::transport::WriteMode;
use crate::types::{DstSlot, GShockError, Result};
use crate::watch_info::WatchInfo;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use log::{debug, info};

pub(crate) async fn synchronize(
    session: &ConnectionSession,
    zone_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    session.emit(ProgressEvent::TimeSyncStarted);
    let zone = match find_time_zone(zone_id, now) {
        Ok(zone) => zone,
        Err(e) => {
            session.emit(ProgressEvent::ApiError(e.to_string()));
            return Err(e);
        }
    };
    let info = *session.watch_info();
    info!(
        "Time sync to {} ({}), offset {}q dst {}q rules {:#04x}",
        zone.city, zone_id, zone.offset_quarters, zone.dst_offset_quarters, zone.rules_code
    );

    sync_dst_watch_states(session, &zone, &info, now).await?;
    sync_city_dst_settings(session, &zone, &info).await?;
    sync_world_cities(session, &zone, &info).await?;
    write_clock(session, &zone, now).await?;

    session.emit(ProgressEvent::TimeSyncCompleted);
    Ok(())
}

/// The DST flag byte the home clock should carry at the given instant
fn home_dst_byte(zone: &CasioTimeZone, now: DateTime<Utc>) -> u8 {
    let mut byte = 0;
    if zone.is_in_dst(now) {
        byte |= codec::DST_ON;
    }
    if zone.has_rules() {
        byte |= codec::DST_AUTO;
    }
    byte
}

/// Refresh the `0x1d` records. Only the first record holds the home clock;
/// the others are written back untouched so the watch sees a full refresh.
async fn sync_dst_watch_states(
    session: &ConnectionSession,
    zone: &CasioTimeZone,
    info: &WatchInfo,
    now: DateTime<Utc>,
) -> Result<()> {
    let slots = [DstSlot::Zero, DstSlot::Two, DstSlot::Four];
    for slot in slots.iter().take(dst_record_count(info)) {
        let key = RegisterKey::for_slot(RegisterTag::DstWatchState, slot.code());
        let record = session.fetch_raw(key.clone()).await?;
        let payload = if *slot == DstSlot::Zero {
            with_dst_state(&record, home_dst_byte(zone, now))?
        } else {
            record
        };
        session.invalidate(&[key]).await;
        session.write(WriteMode::Set, &payload).await?;
    }
    Ok(())
}

fn dst_record_count(info: &WatchInfo) -> usize {
    // one 0x1d record covers two clocks
    usize::from(info.dst_count).min(3)
}

/// Refresh the per-city DST settings (`0x1e`), pointing slot 0 at the
/// target zone's offsets and rules code
async fn sync_city_dst_settings(
    session: &ConnectionSession,
    zone: &CasioTimeZone,
    info: &WatchInfo,
) -> Result<()> {
    for city in 0..info.world_cities_count {
        let key = RegisterKey::for_slot(RegisterTag::DstSetting, city);
        let record = session.fetch_raw(key.clone()).await?;
        let payload = if city == 0 {
            with_world_city_dst(
                &record,
                zone.offset_quarters,
                zone.dst_offset_quarters,
                zone.rules_code,
            )?
        } else {
            record
        };
        session.invalidate(&[key]).await;
        session.write(WriteMode::Set, &payload).await?;
    }
    Ok(())
}

/// Refresh the world-city names (`0x1f`). Slot 0 is rebuilt from the
/// target zone; the others round-trip.
async fn sync_world_cities(
    session: &ConnectionSession,
    zone: &CasioTimeZone,
    info: &WatchInfo,
) -> Result<()> {
    for city in 0..info.world_cities_count {
        let key = RegisterKey::for_slot(RegisterTag::WorldCities, city);
        let payload = if city == 0 {
            encode_world_city(0, &zone.city)
        } else {
            session.fetch_raw(key.clone()).await?
        };
        session.invalidate(&[key]).await;
        session.write(WriteMode::Set, &payload).await?;
    }
    Ok(())
}

/// Write the clock itself: the zone's standard offset plus the DST hour
/// when it is in effect, expressed as local wall-clock time
async fn write_clock(
    session: &ConnectionSession,
    zone: &CasioTimeZone,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut adjusted = now;
    if zone.is_in_dst(now) {
        adjusted += Duration::minutes(15 * i64::from(zone.dst_offset_quarters));
    }
    let offset = FixedOffset::east_opt(i32::from(zone.offset_quarters) * 900).ok_or_else(|| {
        GShockError::EncodingError(format!("offset out of range: {}q", zone.offset_quarters))
    })?;
    let local = adjusted.with_timezone(&offset).naive_local();
    debug!("Writing clock {local}");
    session
        .write(WriteMode::Set, &encode_current_time(&local))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::transport::Transport;
    use crate::watch_info::WatchModel;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration as StdDuration;

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

        fn sets(&self) -> Vec<Vec<u8>> {
            self.writes()
                .into_iter()
                .filter(|(mode, _)| *mode == WriteMode::Set)
                .map(|(_, p)| p)
                .collect()
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

    fn dst_state_record(first_clock: u8) -> Vec<u8> {
        vec![
            0x1d,
            first_clock,
            first_clock + 1,
            0x00,
            0x00,
            0xca,
            0x00,
            0xa0,
            0x00,
            0xff,
            0xff,
            0xff,
            0xff,
            0xff,
        ]
    }

    fn dst_setting_record(city: u8) -> Vec<u8> {
        vec![0x1e, city, 0xca, 0x00, 0xec, 0x04, 0x01]
    }

    fn world_city_record(city: u8, name: &str) -> Vec<u8> {
        let mut record = vec![0x1f, city];
        record.extend_from_slice(name.as_bytes());
        record.resize(20, 0);
        record
    }

    fn canned_gw5600() -> Vec<Vec<u8>> {
        let mut responses = vec![
            dst_state_record(0),
            dst_state_record(2),
            dst_state_record(4),
        ];
        for city in 0..6 {
            responses.push(dst_setting_record(city));
        }
        for city in 1..6 {
            responses.push(world_city_record(city, "TOKYO"));
        }
        responses
    }

    /// Answer each GET with the canned record for its register key
    fn pump(
        transport: Arc<FakeTransport>,
        session: Arc<ConnectionSession>,
        mut responses: Vec<Vec<u8>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut answered = 0;
            loop {
                tokio::time::sleep(StdDuration::from_millis(1)).await;
                let gets: Vec<Vec<u8>> = transport
                    .writes()
                    .into_iter()
                    .filter(|(mode, _)| *mode == WriteMode::Get)
                    .map(|(_, p)| p)
                    .collect();
                while answered < gets.len() {
                    let wanted = RegisterKey::from_response(&gets[answered]).unwrap();
                    if let Some(index) = responses
                        .iter()
                        .position(|r| RegisterKey::from_response(r).unwrap() == wanted)
                    {
                        let response = responses.remove(index);
                        session.on_notification(&response).await.unwrap();
                    }
                    answered += 1;
                }
            }
        })
    }

    fn session_for(transport: Arc<FakeTransport>, model: WatchModel) -> Arc<ConnectionSession> {
        Arc::new(ConnectionSession::with_config(
            transport,
            WatchInfo::for_model(model),
            SessionConfig {
                request_timeout: StdDuration::from_millis(500),
            },
        ))
    }

    fn summer_noon() -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2023, 7, 15)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_full_sync_sequence_gw5600() {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport = FakeTransport::new();
        let session = session_for(transport.clone(), WatchModel::Gw5600);
        let pump = pump(transport.clone(), session.clone(), canned_gw5600());

        session
            .set_time_at("Europe/Sofia", summer_noon())
            .await
            .unwrap();
        pump.abort();

        let sets = transport.sets();
        // 3 DST states + 6 city DST settings + 6 city names + the clock
        assert_eq!(sets.len(), 16);

        // home DST state: on (July) and auto (Athens-compatible rules)
        assert_eq!(sets[0][0], 0x1d);
        assert_eq!(sets[0][3], codec::DST_ON | codec::DST_AUTO);
        // other DST states round-trip untouched
        assert_eq!(sets[1], dst_state_record(2));
        assert_eq!(sets[2], dst_state_record(4));

        // home city DST setting carries Sofia's offsets
        assert_eq!(sets[3][..2], [0x1e, 0x00]);
        assert_eq!(sets[3][4], 8); // UTC+2 standard
        assert_eq!(sets[3][5], 4); // +1h DST
        assert_eq!(sets[3][6], 0x02);
        assert_eq!(sets[4], dst_setting_record(1));

        // home city name replaced, others round-trip
        assert_eq!(sets[9][..2], [0x1f, 0x00]);
        assert_eq!(sets[10], world_city_record(1, "TOKYO"));

        // clock: 12:00 UTC is 15:00 Sofia summer time
        let clock = sets.last().unwrap();
        assert_eq!(
            clock.as_slice(),
            &[0x09, 0xe7, 0x07, 7, 15, 15, 0, 0, 6, 0, 1]
        );
    }

    #[tokio::test]
    async fn test_sync_scales_down_for_b2100() {
        let transport = FakeTransport::new();
        let session = session_for(transport.clone(), WatchModel::B2100);
        let responses = vec![
            dst_state_record(0),
            dst_setting_record(0),
            dst_setting_record(1),
            world_city_record(1, "TOKYO"),
        ];
        let pump = pump(transport.clone(), session.clone(), responses);

        session
            .set_time_at("America/New_York", summer_noon())
            .await
            .unwrap();
        pump.abort();

        let sets = transport.sets();
        // 1 DST state + 2 city DST settings + 2 city names + the clock
        assert_eq!(sets.len(), 6);
        assert_eq!(sets[1][4], 0xec); // -20 quarters
        assert_eq!(sets[1][6], 0x01);

        // 12:00 UTC is 08:00 in New York during DST
        let clock = sets.last().unwrap();
        assert_eq!(clock[5], 8);
    }

    #[tokio::test]
    async fn test_no_dst_zone_writes_clean_flags() {
        let transport = FakeTransport::new();
        let session = session_for(transport.clone(), WatchModel::B2100);
        let responses = vec![
            dst_state_record(0),
            dst_setting_record(0),
            dst_setting_record(1),
            world_city_record(1, "LONDON"),
        ];
        let pump = pump(transport.clone(), session.clone(), responses);

        session
            .set_time_at("Asia/Tokyo", summer_noon())
            .await
            .unwrap();
        pump.abort();

        let sets = transport.sets();
        assert_eq!(sets[0][3], 0x00);
        assert_eq!(sets[1][4], 36);
        assert_eq!(sets[1][5], 0);
        assert_eq!(sets[1][6], 0);
        // 12:00 UTC is 21:00 in Tokyo
        assert_eq!(sets.last().unwrap()[5], 21);
    }

    #[tokio::test]
    async fn test_invalid_zone_reports_and_fails() {
        let transport = FakeTransport::new();
        let session = session_for(transport.clone(), WatchModel::Gw5600);
        let mut events = session.progress_events().subscribe();

        let result = session.set_time_at("Not/A_Zone", summer_noon()).await;
        assert!(matches!(result, Err(GShockError::UnknownTimeZone(_))));
        assert!(transport.writes().is_empty());

        assert_eq!(events.recv().await.unwrap(), ProgressEvent::TimeSyncStarted);
        assert!(matches!(
            events.recv().await.unwrap(),
            ProgressEvent::ApiError(_)
        ));
    }

    #[tokio::test]
    async fn test_sync_emits_completion_event() {
        let transport = FakeTransport::new();
        let session = session_for(transport.clone(), WatchModel::Gw5600);
        let mut events = session.progress_events().subscribe();
        let pump = pump(transport.clone(), session.clone(), canned_gw5600());

        session
            .set_time_at("Europe/London", summer_noon())
            .await
            .unwrap();
        pump.abort();

        assert_eq!(events.recv().await.unwrap(), ProgressEvent::TimeSyncStarted);
        assert_eq!(
            events.recv().await.unwrap(),
            ProgressEvent::TimeSyncCompleted
        );
    }
}
