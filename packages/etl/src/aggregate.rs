//! Collapses hourly observations into one climate row per day.

use std::collections::BTreeMap;

use crime_warehouse_etl_models::{DailyClimate, DateKey, WeatherObservation};

#[derive(Default)]
struct DayAccumulator<'a> {
    sum: f64,
    count: u32,
    min: Option<f64>,
    max: Option<f64>,
    weather: Option<&'a str>,
}

impl<'a> DayAccumulator<'a> {
    fn add(&mut self, observation: &'a WeatherObservation) {
        if let Some(t) = observation.temperature {
            self.sum += t;
            self.count += 1;
            self.min = Some(self.min.map_or(t, |m| m.min(t)));
            self.max = Some(self.max.map_or(t, |m| m.max(t)));
        }
        // Lexicographic maximum, so any real descriptor outranks an
        // upper-case sentinel.
        if self.weather.is_none_or(|w| observation.weather.as_str() > w) {
            self.weather = Some(&observation.weather);
        }
    }

    fn finish(self, date: DateKey) -> DailyClimate {
        DailyClimate {
            year: date.year,
            month: date.month,
            day: date.day,
            temperature_mean: (self.count > 0).then(|| self.sum / f64::from(self.count)),
            temperature_min: self.min,
            temperature_max: self.max,
            weather: self.weather.unwrap_or_default().to_string(),
        }
    }
}

/// Groups observations by calendar day, in ascending date order. Mean, min,
/// and max skip blank temperatures; a day with none has `None` for all
/// three. The day's descriptor is the lexicographically greatest one.
#[must_use]
pub fn aggregate_daily(observations: &[WeatherObservation]) -> Vec<DailyClimate> {
    let mut days: BTreeMap<DateKey, DayAccumulator<'_>> = BTreeMap::new();
    for observation in observations {
        days.entry(observation.date()).or_default().add(observation);
    }

    let daily: Vec<DailyClimate> = days
        .into_iter()
        .map(|(date, acc)| acc.finish(date))
        .collect();

    log::info!(
        "Aggregated {} observations into {} days",
        observations.len(),
        daily.len()
    );

    daily
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(day: i64, time: &str, temperature: Option<f64>, weather: &str) -> WeatherObservation {
        WeatherObservation {
            year: 2019,
            month: 7,
            day,
            time: time.to_string(),
            temperature,
            weather: weather.to_string(),
        }
    }

    #[test]
    fn computes_mean_min_max() {
        let daily = aggregate_daily(&[
            obs(1, "00:00", Some(10.0), "clear"),
            obs(1, "01:00", Some(12.0), "clear"),
            obs(1, "02:00", Some(14.0), "clear"),
        ]);

        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].temperature_mean, Some(12.0));
        assert_eq!(daily[0].temperature_min, Some(10.0));
        assert_eq!(daily[0].temperature_max, Some(14.0));
    }

    #[test]
    fn takes_greatest_descriptor_over_sentinel() {
        let daily = aggregate_daily(&[
            obs(2, "00:00", None, "UNKNOWN"),
            obs(2, "01:00", None, "fog"),
            obs(2, "02:00", None, "clear"),
            obs(3, "00:00", None, "UNKNOWN"),
        ]);

        assert_eq!(daily[0].weather, "fog");
        assert_eq!(daily[0].temperature_mean, None);
        assert_eq!(daily[1].weather, "UNKNOWN");
    }

    #[test]
    fn orders_days_by_date() {
        let daily = aggregate_daily(&[
            obs(9, "00:00", Some(1.0), "rain"),
            obs(3, "00:00", Some(2.0), "rain"),
            obs(5, "00:00", Some(3.0), "rain"),
        ]);
        let days: Vec<_> = daily.iter().map(|d| d.day).collect();
        assert_eq!(days, vec![3, 5, 9]);
    }
}
