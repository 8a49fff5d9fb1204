//! Attendance forwarding to the spreadsheet webhook.
//!
//! Delivery is detached from the request: the registration page never waits
//! for the webhook, and failures are only logged.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use products_directory::EmployeeRecord;
use serde::{Serialize, Serializer};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One registration as the spreadsheet script expects it.
#[derive(Clone, Debug, Serialize)]
pub struct AttendanceEntry {
    #[serde(rename = "รหัสพนักงาน")]
    pub emp_id: String,
    #[serde(rename = "ชื่อ")]
    pub name: String,
    #[serde(rename = "ตำแหน่ง")]
    pub job_title: String,
    #[serde(rename = "ส่วนงานย่อ")]
    pub unit_short: String,
    #[serde(rename = "ชื่อศูนย์ต้นทุน")]
    pub unit_full: String,
    #[serde(rename = "เวลาลงทะเบียน")]
    pub registered_at: DateTime<Utc>,
    #[serde(rename = "ลงทะเบียนด้วยตนเอง", serialize_with = "yes_no")]
    pub manual: bool,
}

impl AttendanceEntry {
    pub fn new(record: &EmployeeRecord, manual: bool, registered_at: DateTime<Utc>) -> Self {
        Self {
            emp_id: record.id.clone(),
            name: record.name.clone(),
            job_title: record.job_title.clone(),
            unit_short: record.unit_short.clone(),
            unit_full: record.unit_full.clone(),
            registered_at,
            manual,
        }
    }
}

fn yes_no<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "ใช่" } else { "ไม่ใช่" })
}

#[derive(Clone, Debug)]
pub struct AttendanceNotifier {
    client: reqwest::Client,
    url: Option<Arc<str>>,
}

impl AttendanceNotifier {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            client,
            url: url.map(Arc::from),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Fire and forget. The returned handle is only useful to tests.
    pub fn notify(&self, entry: AttendanceEntry) -> Option<JoinHandle<()>> {
        let Some(url) = self.url.clone() else {
            debug!(emp_id = %entry.emp_id, "attendance webhook disabled; skipping");
            return None;
        };
        let client = self.client.clone();
        Some(tokio::spawn(async move {
            match client.post(&*url).json(&entry).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(emp_id = %entry.emp_id, manual = entry.manual, "attendance forwarded");
                }
                Ok(response) => warn!(
                    emp_id = %entry.emp_id,
                    status = %response.status(),
                    "attendance webhook answered with an error status"
                ),
                Err(err) => warn!(
                    emp_id = %entry.emp_id,
                    error = %err,
                    "attendance webhook delivery failed"
                ),
            }
        }))
    }
}
