/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Client registry: one record per still-unserviced client request.
//!
//! A record remembers the admitted request, how many occurrences of each
//! node it is still owed, and the results collected for the response that
//! is being assembled.  Records reference nodes by MAC only, so purging a
//! node from the database never leaves a dangling reference behind.

use std::collections::BTreeMap;

use tracing::debug;

use crate::mac::MacAddress;
use crate::request::{NodeResult, RangingRequest, RequestKey};

// ── ClientRecord ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// The admitted request.
    pub request: RangingRequest,

    /// Occurrences still owed, per MAC.  Entries are dropped at zero.
    owed: BTreeMap<MacAddress, u32>,

    /// Results collected since the last delivery.
    pending: Vec<NodeResult>,
}

impl ClientRecord {
    pub fn new(request: &RangingRequest) -> Self {
        Self {
            request: request.clone(),
            owed: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn key(&self) -> RequestKey {
        self.request.key()
    }

    /// Record that `occurrences` results of `mac` are owed.  A repeated
    /// admission keeps the larger count.
    pub fn owe(&mut self, mac: MacAddress, occurrences: u32) {
        if occurrences == 0 {
            return;
        }
        let entry = self.owed.entry(mac).or_insert(0);
        *entry = (*entry).max(occurrences);
    }

    pub fn owed(&self, mac: &MacAddress) -> u32 {
        self.owed.get(mac).copied().unwrap_or(0)
    }

    /// MACs with occurrences still owed.
    pub fn owed_macs(&self) -> impl Iterator<Item = MacAddress> + '_ {
        self.owed.keys().copied()
    }

    /// Collect one result for the pending response.
    ///
    /// Results for nodes that are no longer owed are ignored.  Returns
    /// `true` while further occurrences of the node are owed.
    pub fn accept(&mut self, result: NodeResult) -> bool {
        let mac = result.mac;
        let Some(left) = self.owed.get_mut(&mac) else {
            return false;
        };
        *left = left.saturating_sub(1);
        let still_owed = *left > 0;
        if !still_owed {
            self.owed.remove(&mac);
        }
        self.pending.push(result);
        still_owed
    }

    /// Stop owing anything for `mac` (cancelled or abandoned).
    pub fn forgive(&mut self, mac: &MacAddress) {
        self.owed.remove(mac);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_pending(&mut self) -> Vec<NodeResult> {
        std::mem::take(&mut self.pending)
    }

    /// Nothing owed and nothing left to deliver.
    pub fn is_serviced(&self) -> bool {
        self.owed.is_empty() && self.pending.is_empty()
    }
}

// ── ClientRegistry ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<RequestKey, ClientRecord>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn get(&self, key: &RequestKey) -> Option<&ClientRecord> {
        self.clients.get(key)
    }

    pub fn get_mut(&mut self, key: &RequestKey) -> Option<&mut ClientRecord> {
        self.clients.get_mut(key)
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        self.clients.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    /// Create the record for `request`, or reuse the one already registered
    /// under the same (client, request id).
    pub fn admit(&mut self, request: &RangingRequest) -> &mut ClientRecord {
        let key = request.key();
        let record = self
            .clients
            .entry(key)
            .and_modify(|r| {
                debug!(client = %r.key(), "reusing client record");
                r.request = request.clone();
            })
            .or_insert_with(|| ClientRecord::new(request));
        for node in &request.nodes {
            record.owe(node.mac, node.occurrences());
        }
        record
    }

    /// Stop owing `mac` to every record.
    pub fn forgive_all(&mut self, mac: &MacAddress) {
        for record in self.clients.values_mut() {
            record.forgive(mac);
        }
    }

    /// Drop every fully serviced record and return their keys.
    pub fn remove_serviced(&mut self) -> Vec<RequestKey> {
        let serviced: Vec<RequestKey> = self
            .clients
            .iter()
            .filter(|(_, r)| r.is_serviced())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &serviced {
            self.clients.remove(key);
            debug!(client = %key, "client request fully serviced");
        }
        serviced
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{NodeOutcome, PeriodicNodeInfo, ScanStatus, TargetStatus};

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn failed(m: MacAddress) -> NodeResult {
        NodeResult {
            mac: m,
            outcome: NodeOutcome::Failed {
                status: ScanStatus::DriverError,
                target: TargetStatus::Failure,
            },
        }
    }

    fn request() -> RangingRequest {
        RangingRequest::new(
            "a",
            1,
            vec![
                PeriodicNodeInfo::periodic(mac(1), 1000, 2),
                PeriodicNodeInfo::one_shot(mac(2)).with_retries(1),
            ],
        )
    }

    #[test]
    fn admit_registers_owed_occurrences() {
        let mut reg = ClientRegistry::new();
        let rec = reg.admit(&request());
        assert_eq!(rec.owed(&mac(1)), 2);
        assert_eq!(rec.owed(&mac(2)), 1);
        assert_eq!(rec.owed(&mac(3)), 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn admit_same_key_reuses_record() {
        let mut reg = ClientRegistry::new();
        reg.admit(&request());
        reg.admit(&request());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn accept_counts_down_and_collects() {
        let mut reg = ClientRegistry::new();
        let rec = reg.admit(&request());

        assert!(rec.accept(failed(mac(1))), "one more occurrence owed");
        assert!(!rec.accept(failed(mac(1))));
        assert!(!rec.accept(failed(mac(1))), "no longer owed");
        assert_eq!(rec.take_pending().len(), 2);
        assert!(!rec.has_pending());
    }

    #[test]
    fn record_is_serviced_once_nothing_owed_or_pending() {
        let mut reg = ClientRegistry::new();
        let key = request().key();
        {
            let rec = reg.admit(&request());
            rec.forgive(&mac(1));
            rec.accept(failed(mac(2)));
        }
        assert!(reg.remove_serviced().is_empty(), "result still pending");

        reg.get_mut(&key).unwrap().take_pending();
        assert_eq!(reg.remove_serviced(), vec![key]);
        assert!(reg.is_empty());
    }

    #[test]
    fn forgive_all_clears_mac_from_every_record() {
        let mut reg = ClientRegistry::new();
        reg.admit(&request());
        let mut other = request();
        other.client = "b".into();
        reg.admit(&other);

        reg.forgive_all(&mac(1));
        assert!(reg.iter().all(|r| r.owed(&mac(1)) == 0));
        assert!(reg.iter().all(|r| r.owed(&mac(2)) == 1));
    }
}
