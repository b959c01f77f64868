use tracing::warn;

use crate::{
    config::ThresholdDefaults,
    store::{AcStateEvent, SettingKey, StoredSettings},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateSettings {
    pub max_temp: f32,
    pub min_temp: f32,
    pub ac_allowed: bool,
    ac_state: bool,
    latest_temperature: Option<f32>,
    latest_humidity: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoredAcState {
    Restored(bool),
    Defaulted,
    ExpiredOn,
}

impl ClimateSettings {
    pub fn new(max_temp: f32, min_temp: f32, ac_allowed: bool, ac_state: bool) -> Self {
        Self {
            max_temp,
            min_temp,
            ac_allowed,
            ac_state,
            latest_temperature: None,
            latest_humidity: None,
        }
    }

    pub fn from_stored(
        stored: &StoredSettings,
        defaults: ThresholdDefaults,
        last_event: Option<AcStateEvent>,
        is_stale: impl Fn(&AcStateEvent) -> bool,
    ) -> (Self, RestoredAcState) {
        let max_temp = parse_temp(stored, SettingKey::MaxTemp);
        let min_temp = parse_temp(stored, SettingKey::MinTemp);
        let (max_temp, min_temp) = match (max_temp, min_temp) {
            (Some(max), Some(min)) if max > min => (max, min),
            _ => {
                warn!(
                    "thresholds missing or invalid in store, using defaults ({}/{})",
                    defaults.max_temp, defaults.min_temp
                );
                (defaults.max_temp, defaults.min_temp)
            }
        };

        let ac_allowed = stored
            .get(SettingKey::AcAllowed.as_str())
            .map(|value| parse_bool(value))
            .unwrap_or(false);

        let restored = match last_event {
            Some(event) if !is_stale(&event) => {
                RestoredAcState::Restored(event.state)
            }
            Some(event) if event.state => RestoredAcState::ExpiredOn,
            _ => RestoredAcState::Defaulted,
        };
        let ac_state = matches!(restored, RestoredAcState::Restored(true));

        (
            Self::new(max_temp, min_temp, ac_allowed, ac_state),
            restored,
        )
    }

    pub fn ac_state(&self) -> bool {
        self.ac_state
    }

    /// Returns true when the value actually changed.
    pub fn set_ac_state(&mut self, state: bool) -> bool {
        if self.ac_state == state {
            return false;
        }
        self.ac_state = state;
        true
    }

    pub fn latest_temperature(&self) -> Option<f32> {
        self.latest_temperature
    }

    pub fn latest_humidity(&self) -> Option<f32> {
        self.latest_humidity
    }

    pub fn record_temperature(&mut self, temp_f: f32) {
        self.latest_temperature = Some(temp_f);
    }

    pub fn record_humidity(&mut self, humidity: f32) {
        self.latest_humidity = Some(humidity);
    }

    pub fn set_thresholds(&mut self, max_temp: f32, min_temp: f32) -> bool {
        let changed = (self.max_temp - max_temp).abs() > f32::EPSILON
            || (self.min_temp - min_temp).abs() > f32::EPSILON;
        self.max_temp = max_temp;
        self.min_temp = min_temp;
        changed
    }

    pub fn toggle_allowed(&mut self) -> bool {
        self.ac_allowed = !self.ac_allowed;
        self.ac_allowed
    }
}

pub fn validate_thresholds(max_temp: f32, min_temp: f32) -> bool {
    max_temp.is_finite() && min_temp.is_finite() && max_temp > min_temp
}

pub fn format_temp(value: f32) -> String {
    format!("{value:.1}")
}

fn parse_temp(stored: &StoredSettings, key: SettingKey) -> Option<f32> {
    stored
        .get(key.as_str())
        .and_then(|value| value.trim().parse::<f32>().ok())
        .filter(|value| value.is_finite())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "True" | "true" | "1")
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::store::is_stale;

    fn wall(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn stale_at_noon(event: &AcStateEvent) -> bool {
        is_stale(event.timestamp(), wall(12, 0), 40)
    }

    fn stored(pairs: &[(&str, &str)]) -> StoredSettings {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn loads_persisted_values() {
        let (settings, restored) = ClimateSettings::from_stored(
            &stored(&[("max_temp", "80"), ("min_temp", "70.5"), ("ac_allowed", "True")]),
            ThresholdDefaults::default(),
            Some(AcStateEvent::at(wall(11, 50), true)),
            stale_at_noon,
        );

        assert_eq!(settings.max_temp, 80.0);
        assert_eq!(settings.min_temp, 70.5);
        assert!(settings.ac_allowed);
        assert!(settings.ac_state());
        assert_eq!(restored, RestoredAcState::Restored(true));
    }

    #[test]
    fn empty_store_uses_defaults_and_ac_off() {
        let (settings, restored) = ClimateSettings::from_stored(
            &StoredSettings::new(),
            ThresholdDefaults::default(),
            None,
            stale_at_noon,
        );

        assert_eq!((settings.max_temp, settings.min_temp), (78.0, 72.0));
        assert!(!settings.ac_allowed);
        assert!(!settings.ac_state());
        assert_eq!(restored, RestoredAcState::Defaulted);
    }

    #[test]
    fn stale_on_record_is_treated_as_off() {
        let (settings, restored) = ClimateSettings::from_stored(
            &StoredSettings::new(),
            ThresholdDefaults::default(),
            Some(AcStateEvent::at(wall(9, 0), true)),
            stale_at_noon,
        );

        assert!(!settings.ac_state());
        assert_eq!(restored, RestoredAcState::ExpiredOn);
    }

    #[test]
    fn inverted_stored_thresholds_fall_back() {
        let (settings, _) = ClimateSettings::from_stored(
            &stored(&[("max_temp", "60"), ("min_temp", "80")]),
            ThresholdDefaults::default(),
            None,
            stale_at_noon,
        );
        assert_eq!((settings.max_temp, settings.min_temp), (78.0, 72.0));
    }

    #[test]
    fn ac_state_changes_are_edge_detected() {
        let mut settings = ClimateSettings::new(78.0, 72.0, true, false);
        assert!(!settings.set_ac_state(false));
        assert!(settings.set_ac_state(true));
        assert!(!settings.set_ac_state(true));
    }
}
