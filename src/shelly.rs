//! HTTP telemetry source for Shelly Pro 3EM energy meters.
//!
//! The meter exposes its state through `GET /rpc/Shelly.GetStatus`. The
//! response holds an `em:{id}` object with the instantaneous values and an
//! optional `emdata:{id}` object with the energy totals. When the device is
//! password protected it answers `401` with an HTTP Digest challenge, the
//! request is then repeated once with the computed `Authorization` header.
//!
//! # Example
//!
//! ```no_run
//! use shelly_fronius_lib::{poller::TelemetrySource, shelly::ShellyClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut meter = ShellyClient::new("http://192.168.1.100", 0, Duration::from_secs(2))?
//!         .with_credentials("admin", "secret");
//!     let snapshot = meter.fetch().await?;
//!     println!("Grid power: {} W", snapshot.total_act_power);
//!     Ok(())
//! }
//! ```

use crate::{
    error::{Error, Result},
    poller::TelemetrySource,
    telemetry::{PhaseReading, TelemetrySnapshot},
};
use async_trait::async_trait;
use log::*;
use reqwest::{
    header::{AUTHORIZATION, WWW_AUTHENTICATE},
    StatusCode, Url,
};
use serde::Deserialize;
use std::time::Duration;

pub const STATUS_PATH: &str = "/rpc/Shelly.GetStatus";

/// User name and password for HTTP Digest authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Client fetching [`TelemetrySnapshot`]s from a Shelly Pro 3EM.
#[derive(Debug, Clone)]
pub struct ShellyClient {
    client: reqwest::Client,
    url: Url,
    credentials: Option<Credentials>,
    em_id: u32,
}

impl ShellyClient {
    /// Creates a client for the meter at `base_url` (e.g. `http://192.168.1.100`).
    ///
    /// `em_id` selects the `em:{id}`/`emdata:{id}` component, `timeout` bounds
    /// each HTTP request.
    pub fn new(base_url: &str, em_id: u32, timeout: Duration) -> Result<Self> {
        let raw = format!("{}{STATUS_PATH}", base_url.trim_end_matches('/'));
        let url = Url::parse(&raw).map_err(|err| Error::InvalidUrl {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            credentials: None,
            em_id,
        })
    }

    /// Enables Digest authentication. An empty user name leaves the client
    /// unauthenticated.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = (!username.is_empty()).then(|| Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn status_url(&self) -> &Url {
        &self.url
    }

    /// Fetches the raw status document.
    pub async fn fetch_status(&self) -> Result<serde_json::Value> {
        debug!("GET {}", self.url);
        let mut response = self.client.get(self.url.clone()).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(credentials) = &self.credentials {
                let authorization = self.answer_challenge(&response, credentials)?;
                trace!("Retrying with digest authorization");
                response = self
                    .client
                    .get(self.url.clone())
                    .header(AUTHORIZATION, authorization)
                    .send()
                    .await?;
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn answer_challenge(
        &self,
        response: &reqwest::Response,
        credentials: &Credentials,
    ) -> Result<String> {
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .ok_or_else(|| Error::InvalidHeader("401 without WWW-Authenticate".to_string()))?
            .to_str()
            .map_err(|err| Error::InvalidHeader(err.to_string()))?;
        let mut prompt = digest_auth::parse(challenge)?;
        let context = digest_auth::AuthContext::new(
            credentials.username.as_str(),
            credentials.password.as_str(),
            self.url.path(),
        );
        Ok(prompt.respond(&context)?.to_header_string())
    }
}

#[async_trait]
impl TelemetrySource for ShellyClient {
    async fn fetch(&mut self) -> Result<TelemetrySnapshot> {
        let status = self.fetch_status().await?;
        parse_status(&status, self.em_id)
    }
}

/// `em:{id}` component. Every value may be absent or `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmStatus {
    a_act_power: Option<f64>,
    b_act_power: Option<f64>,
    c_act_power: Option<f64>,
    a_aprt_power: Option<f64>,
    b_aprt_power: Option<f64>,
    c_aprt_power: Option<f64>,
    a_voltage: Option<f64>,
    b_voltage: Option<f64>,
    c_voltage: Option<f64>,
    a_current: Option<f64>,
    b_current: Option<f64>,
    c_current: Option<f64>,
    a_freq: Option<f64>,
    b_freq: Option<f64>,
    c_freq: Option<f64>,
    a_pf: Option<f64>,
    b_pf: Option<f64>,
    c_pf: Option<f64>,
    total_act_power: Option<f64>,
    total_aprt_power: Option<f64>,
    total_current: Option<f64>,
    total_act: Option<f64>,
    total_act_ret: Option<f64>,
}

/// `emdata:{id}` component.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmDataStatus {
    total_act: Option<f64>,
    total_act_ret: Option<f64>,
}

const DEFAULT_FREQUENCY: f64 = 50.0;
const DEFAULT_POWER_FACTOR: f64 = 1.0;

fn phase(
    act_power: Option<f64>,
    aprt_power: Option<f64>,
    voltage: Option<f64>,
    current: Option<f64>,
    freq: Option<f64>,
    pf: Option<f64>,
) -> PhaseReading {
    PhaseReading {
        act_power: act_power.unwrap_or_default(),
        aprt_power: aprt_power.unwrap_or_default(),
        voltage: voltage.unwrap_or_default(),
        current: current.unwrap_or_default(),
        freq: freq.unwrap_or(DEFAULT_FREQUENCY),
        pf: pf.unwrap_or(DEFAULT_POWER_FACTOR),
    }
}

/// Extracts a snapshot from a `Shelly.GetStatus` document.
///
/// `em:{em_id}` must be present; missing values inside it default to 0,
/// frequencies to 50 Hz and power factors to 1. Energy totals are taken from
/// `emdata:{em_id}` and fall back to `em:{em_id}`.
pub fn parse_status(status: &serde_json::Value, em_id: u32) -> Result<TelemetrySnapshot> {
    let em_key = format!("em:{em_id}");
    let em = status
        .get(&em_key)
        .ok_or_else(|| Error::MissingKey(em_key.clone()))?;
    let em = EmStatus::deserialize(em)?;

    let emdata = match status.get(format!("emdata:{em_id}")) {
        Some(value) => EmDataStatus::deserialize(value)?,
        None => {
            debug!("Status has no emdata:{em_id}, energy totals from em:{em_id}");
            EmDataStatus::default()
        }
    };

    Ok(TelemetrySnapshot {
        a: phase(
            em.a_act_power,
            em.a_aprt_power,
            em.a_voltage,
            em.a_current,
            em.a_freq,
            em.a_pf,
        ),
        b: phase(
            em.b_act_power,
            em.b_aprt_power,
            em.b_voltage,
            em.b_current,
            em.b_freq,
            em.b_pf,
        ),
        c: phase(
            em.c_act_power,
            em.c_aprt_power,
            em.c_voltage,
            em.c_current,
            em.c_freq,
            em.c_pf,
        ),
        total_act_power: em.total_act_power.unwrap_or_default(),
        total_aprt_power: em.total_aprt_power.unwrap_or_default(),
        total_current: em.total_current.unwrap_or_default(),
        total_act_energy: emdata.total_act.or(em.total_act).unwrap_or_default(),
        total_act_ret_energy: emdata
            .total_act_ret
            .or(em.total_act_ret)
            .unwrap_or_default(),
    })
}
