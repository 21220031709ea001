use serde_json::{Map, Value};

use crate::model::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Average,
    Min,
    Max,
    Median,
}

/// One statistic reduced over each numeric field of a reading set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub statistic: Statistic,
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub dew_point_c: f64,
}

impl Statistic {
    fn prefix(self) -> &'static str {
        match self {
            Statistic::Average => "average",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Median => "median",
        }
    }

    /// Every statistic of an empty set is `0.0`.
    pub fn reduce(self, mut values: Vec<f64>) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Statistic::Average => {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                round_one_decimal(mean)
            }
            Statistic::Min => values.into_iter().fold(f64::INFINITY, f64::min),
            Statistic::Max => values.into_iter().fold(f64::NEG_INFINITY, f64::max),
            Statistic::Median => {
                // Upper median: even-length sets take the higher middle element.
                values.sort_by(f64::total_cmp);
                values[values.len() / 2]
            }
        }
    }

    pub fn summarize(self, readings: &[Reading]) -> Summary {
        let column = |field: fn(&Reading) -> f64| readings.iter().map(field).collect::<Vec<_>>();
        Summary {
            statistic: self,
            temperature_c: self.reduce(column(|r| r.temperature_c)),
            humidity_percent: self.reduce(column(|r| r.humidity_percent)),
            dew_point_c: self.reduce(column(|r| r.dew_point_c)),
        }
    }
}

/// Half-up rounding to one decimal, i.e. `floor(x * 10 + 0.5) / 10`.
fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0 + 0.5).floor() / 10.0
}

impl Summary {
    /// `{"<stat>TemperatureC", "<stat>HumidityPercent", "<stat>DewPoint"}`.
    pub fn to_json(&self) -> Value {
        let prefix = self.statistic.prefix();
        let mut body = Map::new();
        body.insert(format!("{}TemperatureC", prefix), self.temperature_c.into());
        body.insert(format!("{}HumidityPercent", prefix), self.humidity_percent.into());
        body.insert(format!("{}DewPoint", prefix), self.dew_point_c.into());
        Value::Object(body)
    }
}
