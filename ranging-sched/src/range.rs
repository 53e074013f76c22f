/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Range computation for FTM range requests.
//!
//! An AP-initiated Fine Timing Measurement Range Request is answered with a
//! range report rather than raw measurements.  Ranges are expressed in 1/64 m,
//! the unit of the 802.11 range report element.

use crate::request::{MeasurementInfo, NodeOutcome, NodeResult, RangeEntry, RangeReport, RequestKey};

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT_M_S: u128 = 299_792_458;

/// Picoseconds per second.
const PS_PER_S: u128 = 1_000_000_000_000;

/// Distance for the mean of the non-negative RTT samples, in 1/64 m.
///
/// `range = rtt · c / 2`, scaled by 64.  Returns `None` when no usable sample
/// exists.
pub fn calculate_range_64ths(samples: &[MeasurementInfo]) -> Option<u32> {
    let (sum, count) = samples
        .iter()
        .filter(|s| s.rtt_ps >= 0)
        .fold((0u128, 0u128), |(sum, n), s| (sum + s.rtt_ps as u128, n + 1));

    if count == 0 {
        return None;
    }

    let mean_rtt_ps = sum / count;
    let range = mean_rtt_ps * SPEED_OF_LIGHT_M_S * 32 / PS_PER_S;
    Some(u32::try_from(range).unwrap_or(u32::MAX))
}

/// Build the range report for an FTMRR request from its collected results.
pub fn build_range_report(key: &RequestKey, dialog_token: u8, results: &[NodeResult]) -> RangeReport {
    let mut entries = Vec::new();
    let mut failed = Vec::new();

    for result in results {
        let range = match &result.outcome {
            NodeOutcome::Measured(meas) => calculate_range_64ths(&meas.samples),
            NodeOutcome::Failed { .. } => None,
        };
        match range {
            Some(range_64ths_m) => entries.push(RangeEntry {
                mac: result.mac,
                range_64ths_m,
            }),
            None => failed.push(result.mac),
        }
    }

    RangeReport {
        client: key.client.clone(),
        request_id: key.request_id,
        dialog_token,
        entries,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddress;
    use crate::request::{ScanMeasurement, ScanStatus, TargetStatus};

    fn sample(rtt_ps: i64) -> MeasurementInfo {
        MeasurementInfo {
            rtt_ps,
            rssi_dbm: -50,
        }
    }

    #[test]
    fn ten_metres_is_640_64ths() {
        // 2 × 10 m / c ≈ 66 712 ps
        assert_eq!(calculate_range_64ths(&[sample(66_712)]), Some(639));
        assert_eq!(calculate_range_64ths(&[sample(66_713)]), Some(640));
    }

    #[test]
    fn negative_samples_are_ignored() {
        assert_eq!(
            calculate_range_64ths(&[sample(-5_000), sample(66_713)]),
            calculate_range_64ths(&[sample(66_713)])
        );
    }

    #[test]
    fn no_usable_sample_yields_none() {
        assert_eq!(calculate_range_64ths(&[]), None);
        assert_eq!(calculate_range_64ths(&[sample(-1)]), None);
    }

    #[test]
    fn report_splits_measured_and_failed() {
        let ok = MacAddress::new([2, 0, 0, 0, 0, 1]);
        let bad = MacAddress::new([2, 0, 0, 0, 0, 2]);
        let key = RequestKey {
            client: "ap".into(),
            request_id: 9,
        };
        let results = vec![
            NodeResult {
                mac: ok,
                outcome: NodeOutcome::Measured(ScanMeasurement::success(ok, 66_713, -40)),
            },
            NodeResult {
                mac: bad,
                outcome: NodeOutcome::Failed {
                    status: ScanStatus::Success,
                    target: TargetStatus::NoResponse,
                },
            },
        ];

        let report = build_range_report(&key, 3, &results);
        assert_eq!(report.dialog_token, 3);
        assert_eq!(report.request_id, 9);
        assert_eq!(
            report.entries,
            vec![RangeEntry {
                mac: ok,
                range_64ths_m: 640
            }]
        );
        assert_eq!(report.failed, vec![bad]);
    }
}
