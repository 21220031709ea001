use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBody {
    pub device_name: String,
    pub location: Option<String>,
}

/// Body of `POST /temperatures`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingBody {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub device: DeviceBody,
}

const LOCATIONS: [&str; 4] = ["kitchen", "garage", "attic", "greenhouse"];

pub fn generate(rng: &mut impl Rng, device_index: usize) -> ReadingBody {
    let temperature_c = if rng.gen_bool(0.05) {
        rng.gen_range(-50.0..100.0) // 5% outliers
    } else {
        rng.gen_range(15.0..35.0)
    };

    let humidity_percent = if rng.gen_bool(0.05) {
        rng.gen_range(0.0..100.0) // 5% outliers
    } else {
        rng.gen_range(30.0..80.0)
    };

    ReadingBody {
        temperature_c,
        humidity_percent,
        device: DeviceBody {
            device_name: format!("sim-{}", device_index),
            location: Some(LOCATIONS[device_index % LOCATIONS.len()].to_string()),
        },
    }
}
