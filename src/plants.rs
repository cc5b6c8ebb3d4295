//! Plant catalog views derived from growth measurements.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days from planting to the predicted harvest.
pub const HARVEST_AFTER_DAYS: i64 = 90;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One growth measurement joined with its plant's name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrowthRecord {
    pub plant_name: String,
    /// Centimetres per day.
    pub rate: f64,
    /// Centimetres.
    pub height: f64,
    /// Days since planting.
    pub time_after_planting: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GrowthStage {
    #[serde(rename = "Early Growth")]
    Early,
    #[serde(rename = "Mid Growth")]
    Mid,
    #[serde(rename = "Late Growth")]
    Late,
}

impl GrowthStage {
    pub fn for_days(days: i64) -> Self {
        if days < 30 {
            GrowthStage::Early
        } else if days < 60 {
            GrowthStage::Mid
        } else {
            GrowthStage::Late
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeasonalStatus {
    pub plant_name: String,
    pub start_date: String,
    pub current_stage: GrowthStage,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HarvestPrediction {
    pub plant_name: String,
    pub predicted_harvest_date: String,
}

/// `None` (logged) when the stored day count puts the date out of range.
fn planting_date(today: NaiveDate, record: &GrowthRecord) -> Option<NaiveDate> {
    let date = Duration::try_days(record.time_after_planting)
        .and_then(|age| today.checked_sub_signed(age));
    if date.is_none() {
        log::warn!(
            "plants: skipping {} with out-of-range age of {} days",
            record.plant_name,
            record.time_after_planting
        );
    }
    date
}

pub fn seasonal_status(records: &[GrowthRecord], today: NaiveDate) -> Vec<SeasonalStatus> {
    records
        .iter()
        .filter_map(|r| {
            let planted = planting_date(today, r)?;
            Some(SeasonalStatus {
                plant_name: r.plant_name.clone(),
                start_date: planted.format(DATE_FORMAT).to_string(),
                current_stage: GrowthStage::for_days(r.time_after_planting),
            })
        })
        .collect()
}

pub fn harvest_schedule(records: &[GrowthRecord], today: NaiveDate) -> Vec<HarvestPrediction> {
    records
        .iter()
        .filter_map(|r| {
            let harvest = Duration::try_days(HARVEST_AFTER_DAYS)
                .and_then(|grow| planting_date(today, r)?.checked_add_signed(grow))?;
            Some(HarvestPrediction {
                plant_name: r.plant_name.clone(),
                predicted_harvest_date: harvest.format(DATE_FORMAT).to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, days: i64) -> GrowthRecord {
        GrowthRecord {
            plant_name: name.to_string(),
            rate: 0.5,
            height: 10.0,
            time_after_planting: days,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    #[test]
    fn stage_boundaries() {
        assert_eq!(GrowthStage::for_days(0), GrowthStage::Early);
        assert_eq!(GrowthStage::for_days(29), GrowthStage::Early);
        assert_eq!(GrowthStage::for_days(30), GrowthStage::Mid);
        assert_eq!(GrowthStage::for_days(59), GrowthStage::Mid);
        assert_eq!(GrowthStage::for_days(60), GrowthStage::Late);
    }

    #[test]
    fn seasonal_status_dates_back_from_today() {
        let status = seasonal_status(&[record("Tomato", 10)], today());
        assert_eq!(status[0].start_date, "2024-06-20");
        let json = serde_json::to_value(&status[0]).unwrap();
        assert_eq!(json["current_stage"], "Early Growth");
    }

    #[test]
    fn harvest_is_ninety_days_after_planting() {
        let plan = harvest_schedule(&[record("Basil", 15)], today());
        assert_eq!(plan[0].plant_name, "Basil");
        assert_eq!(plan[0].predicted_harvest_date, "2024-09-13");
    }

    #[test]
    fn out_of_range_ages_are_skipped() {
        let records = [record("Tomato", i64::MAX), record("Basil", 15)];
        let status = seasonal_status(&records, today());
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].plant_name, "Basil");

        let plan = harvest_schedule(&records, today());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].predicted_harvest_date, "2024-09-13");

        assert!(seasonal_status(&[record("Fern", -400_000_000)], today()).is_empty());
    }
}
