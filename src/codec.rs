//! Binary codecs for the watch's fixed-layout registers
//!
//! Pure, stateless encode/decode pairs, one per register family. Decoders
//! for data the app echoes back to the watch (alarms, reminders, settings)
//! fail with a typed error on malformed input; purely informational reads
//! (buttons, unknown settings byte patterns) degrade to defaults instead.
//!
//! Dates inside reminder records use a BCD-like encoding: a byte whose hex
//! digits are read as decimal digits, so `0x22` means decimal 22.

use crate::registers::RegisterTag;
use crate::types::{GShockError, Result, WatchButton};
use chrono::{Datelike, NaiveDateTime, Timelike};
use log::warn;

pub const MAX_ALARMS: usize = 5;
pub const MAX_REMINDERS: usize = 5;
pub const REMINDER_TITLE_LEN: usize = 18;
pub const WORLD_CITY_NAME_LEN: usize = 18;

const ALARM_ENABLED_MASK: u8 = 0x40;
const ALARM_HOURLY_CHIME_MASK: u8 = 0x80;
const ALARM_CONSTANT_VALUE: u8 = 0x40;
const ALARM_RECORD_LEN: usize = 4;

const REMINDER_ENABLED_MASK: u8 = 0x01;
const REMINDER_WEEKLY_MASK: u8 = 0x04;
const REMINDER_YEARLY_MASK: u8 = 0x08;
const REMINDER_MONTHLY_MASK: u8 = 0x10;

/// 0xFF in the first date byte marks an empty reminder slot
const REMINDER_EMPTY_SLOT: u8 = 0xff;

const MASK_24_HOURS: u8 = 0x01;
const MASK_BUTTON_TONE_OFF: u8 = 0x02;
const MASK_AUTO_LIGHT_OFF: u8 = 0x04;
const MASK_POWER_SAVING_OFF: u8 = 0x10;
const MASK_DND_OFF: u8 = 0x40;
const MASK_SOUND: u8 = 0x04;
const MASK_VIBRATION: u8 = 0x08;
const MASK_CHIME: u8 = 0x20;

pub const SETTINGS_SHORT_LEN: usize = 12;
pub const SETTINGS_EXTENDED_LEN: usize = 17;

/// DST state flag bits carried in the `0x1d` record
pub const DST_ON: u8 = 0x01;
pub const DST_AUTO: u8 = 0x02;

// ---------------------------------------------------------------------------
// Alarms
// ---------------------------------------------------------------------------

/// One of up to five watch alarms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub has_hourly_chime: bool,
}

impl Alarm {
    pub fn new(hour: u8, minute: u8, enabled: bool, has_hourly_chime: bool) -> Result<Self> {
        if hour > 23 {
            return Err(GShockError::InvalidArgument(format!(
                "alarm hour out of range: {hour}"
            )));
        }
        if minute > 59 {
            return Err(GShockError::InvalidArgument(format!(
                "alarm minute out of range: {minute}"
            )));
        }
        Ok(Self {
            hour,
            minute,
            enabled,
            has_hourly_chime,
        })
    }
}

fn decode_alarm_record(record: &[u8]) -> Result<Alarm> {
    if record.len() < ALARM_RECORD_LEN {
        return Err(GShockError::ResponseTooShort {
            expected: ALARM_RECORD_LEN,
            got: record.len(),
        });
    }
    Ok(Alarm {
        enabled: record[0] & ALARM_ENABLED_MASK != 0,
        has_hourly_chime: record[0] & ALARM_HOURLY_CHIME_MASK != 0,
        hour: record[2],
        minute: record[3],
    })
}

fn encode_alarm_record(alarm: &Alarm) -> [u8; ALARM_RECORD_LEN] {
    let mut flags = 0;
    if alarm.enabled {
        flags |= ALARM_ENABLED_MASK;
    }
    if alarm.has_hourly_chime {
        flags |= ALARM_HOURLY_CHIME_MASK;
    }
    [flags, ALARM_CONSTANT_VALUE, alarm.hour, alarm.minute]
}

/// Decode an alarm response packet into the alarms it carries.
///
/// The primary packet (`0x15`) carries one alarm; the secondary packet
/// (`0x16`) carries the remaining alarms as consecutive 4-byte records.
pub fn decode_alarm_packet(raw: &[u8]) -> Result<Vec<Alarm>> {
    let tag = *raw.first().ok_or(GShockError::ResponseTooShort {
        expected: 1,
        got: 0,
    })?;
    match RegisterTag::from_u8(tag)? {
        RegisterTag::AlarmPrimary => Ok(vec![decode_alarm_record(&raw[1..])?]),
        RegisterTag::AlarmSecondary => raw[1..]
            .chunks_exact(ALARM_RECORD_LEN)
            .map(decode_alarm_record)
            .collect(),
        _ => Err(GShockError::UnknownRegister(tag)),
    }
}

/// Encode the first alarm as a primary-alarm command
pub fn encode_primary_alarm(alarm: &Alarm) -> Vec<u8> {
    let mut out = vec![RegisterTag::AlarmPrimary.code()];
    out.extend_from_slice(&encode_alarm_record(alarm));
    out
}

/// Encode the remaining alarms (all but the first) as one multi-alarm command
pub fn encode_secondary_alarms(alarms: &[Alarm]) -> Vec<u8> {
    let mut out = vec![RegisterTag::AlarmSecondary.code()];
    for alarm in alarms {
        out.extend_from_slice(&encode_alarm_record(alarm));
    }
    out
}

// ---------------------------------------------------------------------------
// Reminders / events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatPeriod {
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Weekday set as the wire bitmask (Sunday = bit 0 .. Saturday = bit 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Weekdays(u8);

impl Weekdays {
    pub const SUNDAY: u8 = 0x01;
    pub const MONDAY: u8 = 0x02;
    pub const TUESDAY: u8 = 0x04;
    pub const WEDNESDAY: u8 = 0x08;
    pub const THURSDAY: u8 = 0x10;
    pub const FRIDAY: u8 = 0x20;
    pub const SATURDAY: u8 = 0x40;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x7f)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, day: u8) -> bool {
        self.0 & day != 0
    }

    #[must_use]
    pub fn with(self, day: u8) -> Self {
        Self::from_bits(self.0 | day)
    }
}

/// A calendar date as the watch stores it: year 2000-2099, BCD on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl EventDate {
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self> {
        if !(2000..=2099).contains(&year) {
            return Err(GShockError::InvalidArgument(format!(
                "event year out of range: {year}"
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(GShockError::InvalidArgument(format!(
                "event month out of range: {month}"
            )));
        }
        if !(1..=31).contains(&day) {
            return Err(GShockError::InvalidArgument(format!(
                "event day out of range: {day}"
            )));
        }
        Ok(Self { year, month, day })
    }
}

/// The time half of a reminder, fetched from register `0x31`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTime {
    pub enabled: bool,
    pub repeat: RepeatPeriod,
    pub start: EventDate,
    pub end: EventDate,
    pub weekdays: Weekdays,
}

/// A complete reminder, merged from the title (`0x30`) and time (`0x31`)
/// sub-registers for the same slot index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub title: String,
    pub time: EventTime,
    pub incompatible: bool,
    pub selected: bool,
}

impl Event {
    /// The record written to unused slots when padding out a reminder set
    pub fn empty() -> Self {
        Self {
            title: String::new(),
            time: EventTime {
                enabled: false,
                repeat: RepeatPeriod::Never,
                start: EventDate {
                    year: 2000,
                    month: 1,
                    day: 1,
                },
                end: EventDate {
                    year: 2000,
                    month: 1,
                    day: 1,
                },
                weekdays: Weekdays::empty(),
            },
            incompatible: false,
            selected: false,
        }
    }
}

fn bcd_to_dec(byte: u8) -> Result<u8> {
    let hi = byte >> 4;
    let lo = byte & 0x0f;
    if hi > 9 || lo > 9 {
        return Err(GShockError::MalformedResponse(format!(
            "invalid BCD byte {byte:#04x}"
        )));
    }
    Ok(hi * 10 + lo)
}

fn dec_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

fn decode_event_date(bytes: &[u8]) -> Result<EventDate> {
    if bytes.len() < 3 {
        return Err(GShockError::ResponseTooShort {
            expected: 3,
            got: bytes.len(),
        });
    }
    let year = 2000 + u16::from(bcd_to_dec(bytes[0])?);
    let month = bcd_to_dec(bytes[1])?;
    let day = bcd_to_dec(bytes[2])?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(GShockError::MalformedResponse(format!(
            "invalid reminder date {year:04}-{month:02}-{day:02}"
        )));
    }
    Ok(EventDate { year, month, day })
}

fn encode_event_date(date: &EventDate) -> [u8; 3] {
    [
        dec_to_bcd((date.year % 100) as u8),
        dec_to_bcd(date.month),
        dec_to_bcd(date.day),
    ]
}

/// Decode a reminder time record: `31 <slot> <period> <start:3> <end:3> <dow> 00`.
///
/// Returns `Ok(None)` for the `0xFF` empty-slot sentinel, which must
/// short-circuit before any date decoding is attempted.
pub fn decode_reminder_time(raw: &[u8]) -> Result<Option<EventTime>> {
    if raw.len() < 10 {
        return Err(GShockError::ResponseTooShort {
            expected: 10,
            got: raw.len(),
        });
    }
    if raw[3] == REMINDER_EMPTY_SLOT {
        return Ok(None);
    }

    let period = raw[2];
    let repeat = if period & REMINDER_WEEKLY_MASK != 0 {
        RepeatPeriod::Weekly
    } else if period & REMINDER_MONTHLY_MASK != 0 {
        RepeatPeriod::Monthly
    } else if period & REMINDER_YEARLY_MASK != 0 {
        RepeatPeriod::Yearly
    } else {
        RepeatPeriod::Never
    };

    Ok(Some(EventTime {
        enabled: period & REMINDER_ENABLED_MASK != 0,
        repeat,
        start: decode_event_date(&raw[3..6])?,
        end: decode_event_date(&raw[6..9])?,
        weekdays: Weekdays::from_bits(raw[9]),
    }))
}

/// Encode a reminder time record for the given slot (1-5)
pub fn encode_reminder_time(slot: u8, time: &EventTime) -> Vec<u8> {
    let mut period = 0;
    if time.enabled {
        period |= REMINDER_ENABLED_MASK;
    }
    match time.repeat {
        RepeatPeriod::Weekly => period |= REMINDER_WEEKLY_MASK,
        RepeatPeriod::Monthly => period |= REMINDER_MONTHLY_MASK,
        RepeatPeriod::Yearly => period |= REMINDER_YEARLY_MASK,
        RepeatPeriod::Never => {}
        RepeatPeriod::Daily => {
            // the watch has no daily flag; a daily reminder rides on the
            // weekly mask with all weekdays set
            period |= REMINDER_WEEKLY_MASK;
        }
    }

    let weekdays = match time.repeat {
        RepeatPeriod::Weekly => time.weekdays.bits(),
        RepeatPeriod::Daily => 0x7f,
        _ => 0,
    };

    let mut out = vec![RegisterTag::ReminderTime.code(), slot, period];
    out.extend_from_slice(&encode_event_date(&time.start));
    out.extend_from_slice(&encode_event_date(&time.end));
    out.push(weekdays);
    out.push(0);
    out
}

/// Decode a reminder title record: `30 <slot> <18 bytes>`.
///
/// Returns `Ok(None)` for the `0xFF` empty-slot sentinel.
pub fn decode_reminder_title(raw: &[u8]) -> Result<Option<String>> {
    if raw.len() < 3 {
        return Err(GShockError::ResponseTooShort {
            expected: 3,
            got: raw.len(),
        });
    }
    if raw[2] == REMINDER_EMPTY_SLOT {
        return Ok(None);
    }
    Ok(Some(ascii_from(&raw[2..])))
}

/// Encode a reminder title record for the given slot (1-5), truncating the
/// title to 18 bytes at a UTF-8 boundary and zero-padding
pub fn encode_reminder_title(slot: u8, title: &str) -> Vec<u8> {
    let mut out = vec![RegisterTag::ReminderTitle.code(), slot];
    let truncated = truncate_utf8(title, REMINDER_TITLE_LEN);
    out.extend_from_slice(truncated.as_bytes());
    out.resize(2 + REMINDER_TITLE_LEN, 0);
    out
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    TwelveHour,
    TwentyFourHour,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    MonthDay,
    DayMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English = 0,
    Spanish = 1,
    French = 2,
    German = 3,
    Italian = 4,
    Russian = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightDuration {
    TwoSeconds,
    FourSeconds,
}

/// Watch settings backed by the basic-settings bitfield (register `0x13`)
///
/// `sound`, `vibration`, and `hourly_chime` only exist in the 17-byte
/// extended layout; they decode as `false` on short-layout watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub time_format: TimeFormat,
    pub date_format: DateFormat,
    pub language: Language,
    pub auto_light: bool,
    pub light_duration: LightDuration,
    pub power_saving: bool,
    pub button_tone: bool,
    pub do_not_disturb: bool,
    pub sound: bool,
    pub vibration: bool,
    pub hourly_chime: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_format: TimeFormat::TwelveHour,
            date_format: DateFormat::MonthDay,
            language: Language::English,
            auto_light: true,
            light_duration: LightDuration::TwoSeconds,
            power_saving: true,
            button_tone: true,
            do_not_disturb: false,
            sound: false,
            vibration: false,
            hourly_chime: false,
        }
    }
}

fn language_from_byte(byte: u8) -> Language {
    match byte {
        0 => Language::English,
        1 => Language::Spanish,
        2 => Language::French,
        3 => Language::German,
        4 => Language::Italian,
        5 => Language::Russian,
        other => {
            warn!("Unknown language byte {other:#04x}, defaulting to English");
            Language::English
        }
    }
}

/// Decode a basic-settings response, dispatching on the response length to
/// pick the 12-byte short or 17-byte extended layout
pub fn decode_settings(raw: &[u8]) -> Result<Settings> {
    if raw.len() < SETTINGS_SHORT_LEN {
        return Err(GShockError::ResponseTooShort {
            expected: SETTINGS_SHORT_LEN,
            got: raw.len(),
        });
    }

    let flags = raw[1];
    let mut settings = Settings {
        time_format: if flags & MASK_24_HOURS != 0 {
            TimeFormat::TwentyFourHour
        } else {
            TimeFormat::TwelveHour
        },
        button_tone: flags & MASK_BUTTON_TONE_OFF == 0,
        auto_light: flags & MASK_AUTO_LIGHT_OFF == 0,
        power_saving: flags & MASK_POWER_SAVING_OFF == 0,
        do_not_disturb: flags & MASK_DND_OFF == 0,
        light_duration: if raw[2] == 1 {
            LightDuration::FourSeconds
        } else {
            LightDuration::TwoSeconds
        },
        date_format: if raw[4] == 1 {
            DateFormat::DayMonth
        } else {
            DateFormat::MonthDay
        },
        language: language_from_byte(raw[5]),
        ..Settings::default()
    };

    if raw.len() >= SETTINGS_EXTENDED_LEN {
        settings.sound = raw[12] & MASK_SOUND != 0;
        settings.vibration = raw[12] & MASK_VIBRATION != 0;
        settings.hourly_chime = raw[12] & MASK_CHIME != 0;
    }

    Ok(settings)
}

fn settings_flags(settings: &Settings) -> u8 {
    let mut flags = 0;
    if settings.time_format == TimeFormat::TwentyFourHour {
        flags |= MASK_24_HOURS;
    }
    if !settings.button_tone {
        flags |= MASK_BUTTON_TONE_OFF;
    }
    if !settings.auto_light {
        flags |= MASK_AUTO_LIGHT_OFF;
    }
    if !settings.power_saving {
        flags |= MASK_POWER_SAVING_OFF;
    }
    if !settings.do_not_disturb {
        flags |= MASK_DND_OFF;
    }
    flags
}

/// Encode settings in the 12-byte short layout
pub fn encode_settings(settings: &Settings) -> Vec<u8> {
    let mut out = vec![0u8; SETTINGS_SHORT_LEN];
    out[0] = RegisterTag::BasicSettings.code();
    out[1] = settings_flags(settings);
    if settings.light_duration == LightDuration::FourSeconds {
        out[2] = 1;
    }
    if settings.date_format == DateFormat::DayMonth {
        out[4] = 1;
    }
    out[5] = settings.language as u8;
    out
}

/// Encode settings in the extended layout by patching a previously read
/// record, so bytes the engine does not model round-trip unchanged
pub fn patch_settings_extended(record: &[u8], settings: &Settings) -> Result<Vec<u8>> {
    if record.len() < SETTINGS_EXTENDED_LEN {
        return Err(GShockError::ResponseTooShort {
            expected: SETTINGS_EXTENDED_LEN,
            got: record.len(),
        });
    }
    let mut out = record.to_vec();
    out[1] = settings_flags(settings);
    out[2] = u8::from(settings.light_duration == LightDuration::FourSeconds);
    out[4] = u8::from(settings.date_format == DateFormat::DayMonth);
    out[5] = settings.language as u8;
    let mut sound_flags = out[12] & !(MASK_SOUND | MASK_VIBRATION | MASK_CHIME);
    if settings.sound {
        sound_flags |= MASK_SOUND;
    }
    if settings.vibration {
        sound_flags |= MASK_VIBRATION;
    }
    if settings.hourly_chime {
        sound_flags |= MASK_CHIME;
    }
    out[12] = sound_flags;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Watch condition / battery
// ---------------------------------------------------------------------------

/// Battery and temperature as reported by register `0x28`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchCondition {
    pub battery_percent: u8,
    pub temperature: i8,
}

/// Decode the watch-condition record.
///
/// The battery percentage is two-tier: byte 1 bit 0x10 contributes a coarse
/// 50%, and the low nibble of byte 2 maps 0-15 proportionally onto the
/// remaining 50%. The sum is clamped to 100.
pub fn decode_watch_condition(raw: &[u8]) -> Result<WatchCondition> {
    if raw.len() < 4 {
        return Err(GShockError::ResponseTooShort {
            expected: 4,
            got: raw.len(),
        });
    }
    let mut percent: u32 = if raw[1] & 0x10 != 0 { 50 } else { 0 };
    percent += 50 * u32::from(raw[2] & 0x0f) / 15;
    Ok(WatchCondition {
        battery_percent: percent.min(100) as u8,
        temperature: raw[3] as i8,
    })
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Decode the countdown timer register into total seconds
pub fn decode_timer(raw: &[u8]) -> Result<u32> {
    if raw.len() < 4 {
        return Err(GShockError::ResponseTooShort {
            expected: 4,
            got: raw.len(),
        });
    }
    Ok(u32::from(raw[1]) * 3600 + u32::from(raw[2]) * 60 + u32::from(raw[3]))
}

/// Encode a countdown timer value as the 7-byte set command
pub fn encode_timer(total_seconds: u32) -> Result<Vec<u8>> {
    if total_seconds > 24 * 3600 {
        return Err(GShockError::InvalidArgument(format!(
            "timer exceeds 24 hours: {total_seconds}s"
        )));
    }
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    Ok(vec![
        RegisterTag::Timer.code(),
        hours as u8,
        minutes as u8,
        seconds as u8,
        0,
        0,
        0,
    ])
}

// ---------------------------------------------------------------------------
// World cities and DST records
// ---------------------------------------------------------------------------

/// Decode the city name from a world-city record (`1f <slot> <18 ascii>`)
pub fn decode_world_city(raw: &[u8]) -> Result<String> {
    if raw.len() < 3 {
        return Err(GShockError::ResponseTooShort {
            expected: 3,
            got: raw.len(),
        });
    }
    Ok(ascii_from(&raw[2..]))
}

/// Encode a world-city record for the given slot, truncating the name to
/// 18 bytes and zero-padding
pub fn encode_world_city(slot: u8, name: &str) -> Vec<u8> {
    let mut out = vec![RegisterTag::WorldCities.code(), slot];
    let truncated = truncate_utf8(name, WORLD_CITY_NAME_LEN);
    out.extend_from_slice(truncated.as_bytes());
    out.resize(2 + WORLD_CITY_NAME_LEN, 0);
    out
}

/// Replace the main-clock DST flag byte (index 3) in a `0x1d` record,
/// carrying every other byte through unchanged
pub fn with_dst_state(record: &[u8], dst: u8) -> Result<Vec<u8>> {
    if record.len() < 4 {
        return Err(GShockError::ResponseTooShort {
            expected: 4,
            got: record.len(),
        });
    }
    let mut out = record.to_vec();
    out[3] = dst;
    Ok(out)
}

/// Replace the offset, DST offset, and DST rules bytes (indices 4-6) in a
/// `0x1e` world-city DST record, carrying every other byte through unchanged.
/// Offsets are in quarter-hour units; negative offsets are stored as
/// two's complement.
pub fn with_world_city_dst(
    record: &[u8],
    offset_quarters: i8,
    dst_offset_quarters: u8,
    rules_code: u8,
) -> Result<Vec<u8>> {
    if record.len() < 7 {
        return Err(GShockError::ResponseTooShort {
            expected: 7,
            got: record.len(),
        });
    }
    let mut out = record.to_vec();
    out[4] = offset_quarters as u8;
    out[5] = dst_offset_quarters;
    out[6] = rules_code;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Current time
// ---------------------------------------------------------------------------

/// Encode the "set current time" command: tag, little-endian year, month,
/// day, hour, minute, second, ISO weekday (Monday = 1), hundredths, and a
/// trailing constant 1
pub fn encode_current_time(time: &NaiveDateTime) -> Vec<u8> {
    let year = time.year() as u16;
    vec![
        RegisterTag::CurrentTime.code(),
        (year & 0xff) as u8,
        (year >> 8) as u8,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.weekday().number_from_monday() as u8,
        (time.nanosecond() / 10_000_000).min(99) as u8,
        1,
    ]
}

// ---------------------------------------------------------------------------
// Time adjustment
// ---------------------------------------------------------------------------

/// Auto time-adjustment state from register `0x11`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAdjustment {
    pub enabled: bool,
    pub minutes_after_hour: u8,
}

pub fn decode_time_adjustment(raw: &[u8]) -> Result<TimeAdjustment> {
    if raw.len() < 14 {
        return Err(GShockError::ResponseTooShort {
            expected: 14,
            got: raw.len(),
        });
    }
    let minutes = raw[13];
    Ok(TimeAdjustment {
        enabled: raw[12] == 0,
        minutes_after_hour: if minutes <= 59 { minutes } else { 30 },
    })
}

/// Patch the enabled flag (byte 12) and minutes (byte 13) into a previously
/// read `0x11` record; all other bytes must round-trip unchanged
pub fn with_time_adjustment(record: &[u8], adjustment: &TimeAdjustment) -> Result<Vec<u8>> {
    if record.len() < 14 {
        return Err(GShockError::ResponseTooShort {
            expected: 14,
            got: record.len(),
        });
    }
    let mut out = record.to_vec();
    out[12] = if adjustment.enabled { 0x00 } else { 0x80 };
    out[13] = adjustment.minutes_after_hour;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Button, watch name
// ---------------------------------------------------------------------------

/// Decode the pressed-button value from a BLE-features response.
///
/// Best effort: malformed or short responses decode to
/// [`WatchButton::Invalid`] rather than failing, since this register is
/// purely informational.
pub fn decode_pressed_button(raw: &[u8]) -> WatchButton {
    const LOWER_LEFT_MASK: u8 = 0x01;
    const FIND_PHONE_MASK: u8 = 0x02;
    const NO_BUTTON_VALUE: u8 = 0x03;
    const LOWER_RIGHT_MASK: u8 = 0x04;
    const AUTO_CONNECT_MASK: u8 = 0x08;

    if raw.len() < 19 {
        return WatchButton::Invalid;
    }
    let value = raw[8];
    if value & AUTO_CONNECT_MASK != 0 {
        WatchButton::AlwaysConnected
    } else if value == NO_BUTTON_VALUE {
        WatchButton::NoButton
    } else if value & FIND_PHONE_MASK != 0 {
        WatchButton::FindPhone
    } else if value == 0 || value & LOWER_LEFT_MASK != 0 {
        WatchButton::LowerLeft
    } else if value & LOWER_RIGHT_MASK != 0 {
        WatchButton::LowerRight
    } else {
        WatchButton::NoButton
    }
}

/// Decode the watch name (printable ASCII after the tag byte)
pub fn decode_watch_name(raw: &[u8]) -> Result<String> {
    if raw.len() < 2 {
        return Err(GShockError::ResponseTooShort {
            expected: 2,
            got: raw.len(),
        });
    }
    Ok(ascii_from(&raw[1..]))
}

/// Collect printable ASCII up to the first padding or garbage byte
fn ascii_from(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| (0x20..0x7f).contains(*b))
        .map(|&b| b as char)
        .collect()
}

/// Truncate a string to at most `max_bytes` UTF-8 bytes without splitting a
/// character
pub(crate) fn truncate_utf8(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}
