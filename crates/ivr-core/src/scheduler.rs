//! Time-of-day routing table
//!
//! Each rule binds `(group, event, date/time window)` to a script entry.
//! Rule files hold one rule per line:
//!
//! ```text
//! # group/event  when                  script
//! */*            all-days              @generic
//! sales/*        mon-fri 09:00-17:00   @business
//! */incoming     2025 dec 25           @holiday
//! ```
//!
//! `*` on either side of `group/event` is a wildcard. Optional tokens are a
//! 4-digit year, a 3-letter month, a day of month, a weekday or weekday
//! range, and `HH:MM` start and end times (or `HH:MM-HH:MM`). A window whose
//! start is after its end wraps past midnight.

use crate::errors::{IvrError, Result};
use chrono::{Datelike, NaiveDateTime, Timelike};

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAYS: [&str; 7] = ["mo", "tu", "we", "th", "fr", "sa", "su"];

/// One routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRule {
    pub group: Option<String>,
    pub event: Option<String>,
    pub script: String,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    /// Bit 0 = Monday
    pub weekdays: Option<u8>,
    /// Minutes after midnight
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl ScheduleRule {
    fn matches(&self, group: &str, event: &str, now: &NaiveDateTime) -> bool {
        if self.group.as_deref().is_some_and(|g| g != group) {
            return false;
        }
        if self.event.as_deref().is_some_and(|e| e != event) {
            return false;
        }
        if self.year.is_some_and(|y| y != now.year())
            || self.month.is_some_and(|m| m != now.month())
            || self.day.is_some_and(|d| d != now.day())
        {
            return false;
        }
        if let Some(days) = self.weekdays {
            if days & (1 << now.weekday().num_days_from_monday()) == 0 {
                return false;
            }
        }
        let minute = now.hour() * 60 + now.minute();
        match (self.start, self.end) {
            (Some(start), Some(end)) if start <= end => start <= minute && minute < end,
            (Some(start), Some(end)) => minute >= start || minute < end,
            (Some(start), None) => minute >= start,
            _ => true,
        }
    }

    /// Which axes this rule pins down: year, month, group, event, weekdays
    fn specificity(&self) -> [bool; 5] {
        [
            self.year.is_some(),
            self.month.is_some(),
            self.group.is_some(),
            self.event.is_some(),
            self.weekdays.is_some(),
        ]
    }
}

/// Parsed rule table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scheduler {
    rules: Vec<ScheduleRule>,
}

impl Scheduler {
    pub fn new(rules: Vec<ScheduleRule>) -> Self {
        Self { rules }
    }

    /// Parse a rule file; `file` only labels error messages
    pub fn parse(file: &str, text: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rule = parse_rule(line)
                .map_err(|message| IvrError::config(format!("{}:{}: {}", file, n + 1, message)))?;
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ScheduleRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Script for `group`/`event` at `now`, or `None` when nothing matches.
    ///
    /// A matching rule replaces the current best unless it leaves open an
    /// axis the best one pins down. Equally specific matches therefore
    /// resolve to the last one in the file.
    pub fn select(&self, group: &str, event: &str, now: NaiveDateTime) -> Option<&str> {
        let mut best: Option<(&ScheduleRule, [bool; 5])> = None;
        for rule in self.rules.iter().filter(|r| r.matches(group, event, &now)) {
            let spec = rule.specificity();
            if let Some((_, current)) = &best {
                if current.iter().zip(spec.iter()).any(|(&had, &has)| had && !has) {
                    continue;
                }
            }
            best = Some((rule, spec));
        }
        best.map(|(rule, _)| rule.script.as_str())
    }
}

fn parse_rule(line: &str) -> std::result::Result<ScheduleRule, String> {
    let mut rule = ScheduleRule {
        group: None,
        event: None,
        script: String::new(),
        year: None,
        month: None,
        day: None,
        weekdays: None,
        start: None,
        end: None,
    };
    for token in line.split_whitespace() {
        let lower = token.to_ascii_lowercase();
        if token.starts_with('@') {
            if !rule.script.is_empty() {
                return Err(format!("second script {}", token));
            }
            rule.script = token.to_string();
        } else if let Some((group, event)) = token.split_once('/') {
            rule.group = wildcard(group);
            rule.event = wildcard(event);
        } else if lower.contains(':') {
            for part in lower.split('-') {
                let minutes = parse_time(part).ok_or_else(|| format!("invalid time {}", token))?;
                if rule.start.is_none() {
                    rule.start = Some(minutes);
                } else if rule.end.is_none() {
                    rule.end = Some(minutes);
                } else {
                    return Err(format!("too many times at {}", token));
                }
            }
        } else if lower == "*" || lower == "all-days" || lower == "all" || lower == "daily" {
            // no restriction
        } else if lower.len() == 4 && lower.bytes().all(|b| b.is_ascii_digit()) {
            rule.year = lower.parse().ok();
        } else if lower.bytes().all(|b| b.is_ascii_digit()) {
            match lower.parse::<u32>() {
                Ok(day) if (1..=31).contains(&day) => rule.day = Some(day),
                _ => return Err(format!("invalid day {}", token)),
            }
        } else if let Some(month) = month_of(&lower) {
            rule.month = Some(month);
        } else {
            rule.weekdays = Some(parse_weekdays(&lower).ok_or_else(|| format!("unknown token {}", token))?);
        }
    }
    if rule.script.is_empty() {
        return Err("rule has no @script".to_string());
    }
    Ok(rule)
}

fn wildcard(text: &str) -> Option<String> {
    match text {
        "" | "*" => None,
        other => Some(other.to_string()),
    }
}

fn parse_time(text: &str) -> Option<u32> {
    let (hour, minute) = text.split_once(':')?;
    let (hour, minute): (u32, u32) = (hour.parse().ok()?, minute.parse().ok()?);
    (hour < 24 && minute < 60).then_some(hour * 60 + minute)
}

fn month_of(text: &str) -> Option<u32> {
    if text.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| text.starts_with(m))
        .map(|i| i as u32 + 1)
}

fn weekday_of(text: &str) -> Option<u32> {
    if text.len() < 2 {
        return None;
    }
    WEEKDAYS.iter().position(|d| text.starts_with(d)).map(|i| i as u32)
}

/// `mo`, `mon`, `monday` or a range like `mo-fr` (ranges may wrap)
fn parse_weekdays(text: &str) -> Option<u8> {
    match text.split_once('-') {
        None => weekday_of(text).map(|d| 1 << d),
        Some((from, to)) => {
            let (from, to) = (weekday_of(from)?, weekday_of(to)?);
            let mut bits = 0u8;
            let mut day = from;
            loop {
                bits |= 1 << day;
                if day == to {
                    break;
                }
                day = (day + 1) % 7;
            }
            Some(bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn test_more_specific_rule_wins_in_its_window() {
        let table = Scheduler::parse(
            "schedule.conf",
            "*/* all-days @generic\nsales/* Mon-Fri 09:00-17:00 @business\n",
        )
        .unwrap();

        // 2024-06-04 is a Tuesday, 2024-06-08 a Saturday
        assert_eq!(table.select("sales", "incoming", at(2024, 6, 4, 10, 0)), Some("@business"));
        assert_eq!(table.select("sales", "incoming", at(2024, 6, 8, 10, 0)), Some("@generic"));
        assert_eq!(table.select("sales", "incoming", at(2024, 6, 4, 17, 0)), Some("@generic"));
        assert_eq!(table.select("support", "incoming", at(2024, 6, 4, 10, 0)), Some("@generic"));
    }

    #[test]
    fn test_order_does_not_let_generic_override_specific() {
        let table = Scheduler::parse("s", "sales/* mo-fr @business\n*/* @generic\n").unwrap();
        assert_eq!(table.select("sales", "x", at(2024, 6, 4, 10, 0)), Some("@business"));
    }

    #[test]
    fn test_equal_specificity_last_match_wins() {
        let table = Scheduler::parse("s", "sales/* @first\nsales/* @second\n").unwrap();
        assert_eq!(table.select("sales", "x", at(2024, 6, 4, 10, 0)), Some("@second"));
    }

    #[test]
    fn test_window_wraps_past_midnight() {
        let table = Scheduler::parse("s", "*/* 22:00 06:00 @night\n").unwrap();
        assert_eq!(table.select("g", "e", at(2024, 6, 4, 23, 30)), Some("@night"));
        assert_eq!(table.select("g", "e", at(2024, 6, 4, 5, 59)), Some("@night"));
        assert_eq!(table.select("g", "e", at(2024, 6, 4, 12, 0)), None);
    }

    #[test]
    fn test_date_fields_and_weekday_wrap() {
        let table = Scheduler::parse("s", "*/incoming 2025 Dec 25 @holiday\n*/* fr-mo @weekend\n").unwrap();
        let rule = &table.rules()[0];
        assert_eq!((rule.year, rule.month, rule.day), (Some(2025), Some(12), Some(25)));
        assert_eq!(rule.event.as_deref(), Some("incoming"));
        assert_eq!(table.rules()[1].weekdays, Some(0b111_0001));

        assert_eq!(table.select("g", "incoming", at(2025, 12, 25, 9, 0)), Some("@holiday"));
        assert_eq!(table.select("g", "other", at(2025, 12, 25, 9, 0)), None);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = Scheduler::parse("sched", "*/* @ok\n*/* funday @bad\n").unwrap_err();
        assert!(err.to_string().contains("sched:2:"), "{}", err);
        assert!(Scheduler::parse("s", "*/* mo-fr\n").is_err());
        assert!(Scheduler::parse("s", "*/* 25:00 @x\n").is_err());
    }
}
