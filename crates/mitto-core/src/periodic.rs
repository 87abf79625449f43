// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frequency {
    pub value: u32,
    pub unit: FrequencyUnit,
    /// Valid only when `unit == Days`; `"HH:MM"` UTC.
    pub at: Option<String>,
}

impl Frequency {
    pub fn validate(&self) -> CoreResult<()> {
        if self.value < 1 {
            return Err(CoreError::Validation("frequency_value<1".into()));
        }
        if self.at.is_some() && self.unit != FrequencyUnit::Days {
            return Err(CoreError::Validation(
                "at supplied without unit=days".into(),
            ));
        }
        if let Some(at) = &self.at {
            parse_hhmm(at)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicPrompt {
    pub prompt_text: String,
    pub frequency: Frequency,
    pub enabled: bool,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

impl PeriodicPrompt {
    pub fn new(prompt_text: impl Into<String>, frequency: Frequency) -> CoreResult<Self> {
        frequency.validate()?;
        let mut prompt = Self {
            prompt_text: prompt_text.into(),
            frequency,
            enabled: true,
            last_sent_at: None,
            next_scheduled_at: None,
        };
        prompt.reschedule_from(Utc::now());
        Ok(prompt)
    }

    /// Recompute `next_scheduled_at` from `base` (typically `last_sent_at`
    /// or, for an initial schedule, the current time). Must be called on
    /// every enable/modify/fire.
    pub fn reschedule_from(&mut self, base: DateTime<Utc>) {
        self.next_scheduled_at = Some(next_occurrence(&self.frequency, base));
    }

    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_sent_at = Some(now);
        self.reschedule_from(now);
    }
}

fn parse_hhmm(at: &str) -> CoreResult<NaiveTime> {
    NaiveTime::parse_from_str(at, "%H:%M")
        .map_err(|_| CoreError::Validation(format!("invalid HH:MM time: {at}")))
}

/// Compute the next fire time strictly after `base`.
fn next_occurrence(frequency: &Frequency, base: DateTime<Utc>) -> DateTime<Utc> {
    match frequency.unit {
        FrequencyUnit::Minutes => base + Duration::minutes(frequency.value as i64),
        FrequencyUnit::Hours => base + Duration::hours(frequency.value as i64),
        FrequencyUnit::Days => match &frequency.at {
            Some(at) => {
                let time = parse_hhmm(at).expect("validated at construction");
                let min_date = base + Duration::days(frequency.value as i64);
                let mut candidate = Utc
                    .with_ymd_and_hms(
                        min_date.year(),
                        min_date.month(),
                        min_date.day(),
                        time.hour(),
                        time.minute(),
                        0,
                    )
                    .single()
                    .unwrap_or(min_date);
                if candidate < min_date {
                    candidate += Duration::days(1);
                }
                candidate
            }
            None => base + Duration::days(frequency.value as i64),
        },
    }
}
