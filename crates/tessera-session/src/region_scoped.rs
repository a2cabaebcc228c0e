//! Region-scoped session-token capturing
//!
//! Alongside the collection-wide registry, tokens are also kept per region
//! they were observed from. Requests can then send a region-aware token that
//! keeps only the LSNs of the caller's preferred regions, setting every other
//! region to `-1`. This bounds what a replica has to catch up on to the regions
//! the caller actually reads from.
//!
//! Masking always starts from the collection-wide token. The per-region
//! copies answer "what did region X last hand us" for inspection and are
//! never sent; each region's copy has its own, smaller bound.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::header::{format_entry, format_header, parse_header_lenient};
use crate::registry::{SessionKey, SessionTokenRegistry};
use crate::token::SessionToken;

/// Session-token registry that also tracks tokens per source region
#[derive(Debug)]
pub struct RegionScopedRegistry {
    global: SessionTokenRegistry,
    by_region: DashMap<String, Arc<SessionTokenRegistry>>,
    region_ids: DashMap<String, u32>,
    regional_capacity: usize,
}

const DEFAULT_REGIONAL_CAPACITY: usize = 1_000;

impl RegionScopedRegistry {
    /// Create a registry whose main map holds at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            global: SessionTokenRegistry::new(capacity),
            by_region: DashMap::new(),
            region_ids: DashMap::new(),
            regional_capacity: capacity.min(DEFAULT_REGIONAL_CAPACITY),
        }
    }

    /// Bound each region's copy separately from the main map
    pub fn with_regional_capacity(mut self, capacity: usize) -> Self {
        self.regional_capacity = capacity.max(1);
        self
    }

    /// The collection-wide registry
    pub fn global(&self) -> &SessionTokenRegistry {
        &self.global
    }

    /// Associate a region name with the id used inside vector tokens
    pub fn map_region(&self, name: impl Into<String>, region_id: u32) {
        self.region_ids.insert(name.into(), region_id);
    }

    pub fn region_id(&self, name: &str) -> Option<u32> {
        self.region_ids.get(name).map(|id| *id)
    }

    /// Record a token observed in a response served by `region`
    pub fn record_token_from_region(&self, key: SessionKey, region: &str, token: SessionToken) {
        self.global.record_token(key.clone(), token.clone());
        self.region_registry(region).record_token(key, token);
    }

    /// Record every entry of a response header served by `region`
    pub fn record_from_header(&self, collection_rid: &str, region: Option<&str>, header: &str) -> usize {
        let entries = parse_header_lenient(header);
        let recorded = entries.len();
        for (range, token) in entries {
            let key = SessionKey::new(collection_rid, range);
            match region {
                Some(region) => self.record_token_from_region(key, region, token),
                None => self.global.record_token(key, token),
            }
        }
        recorded
    }

    /// Token captured from one region only
    ///
    /// For inspection; request headers come from the main map.
    pub fn resolve_region_token(&self, region: &str, key: &SessionKey) -> Option<SessionToken> {
        let registry = self.by_region.get(region).map(|r| Arc::clone(r.value()))?;
        registry.resolve_token(key)
    }

    /// Collection-wide token with LSNs outside `preferred_regions` set to `-1`
    ///
    /// Falls back to the unmasked token when it is a simple token, when no
    /// preferred regions are given, or when a preferred region has no known id.
    pub fn resolve_region_aware_token(
        &self,
        key: &SessionKey,
        preferred_regions: &[String],
    ) -> Option<SessionToken> {
        let token = self.global.resolve_token(key)?;
        Some(self.mask(token, preferred_regions))
    }

    /// Region-aware header for one range, else the masked collection composite
    pub fn resolve_header(
        &self,
        collection_rid: &str,
        partition_key_range_id: Option<&str>,
        preferred_regions: &[String],
    ) -> Option<String> {
        if let Some(range) = partition_key_range_id {
            let key = SessionKey::new(collection_rid, range);
            if let Some(token) = self.resolve_region_aware_token(&key, preferred_regions) {
                return Some(format_entry(range, &token));
            }
        }

        let tokens: Vec<_> = self
            .global
            .collection_tokens(collection_rid)
            .into_iter()
            .map(|(range, token)| (range, self.mask(token, preferred_regions)))
            .collect();
        if tokens.is_empty() {
            return None;
        }
        Some(format_header(tokens.iter().map(|(r, t)| (r.as_str(), t))))
    }

    /// Drop every token of a collection from the global and regional maps
    pub fn clear_collection(&self, collection_rid: &str) -> usize {
        for registry in self.by_region.iter() {
            registry.clear_collection(collection_rid);
        }
        self.global.clear_collection(collection_rid)
    }

    pub fn clear_collection_by_name(&self, name: &str) -> usize {
        match self.global.collection_rid(name) {
            Some(rid) => {
                let removed = self.clear_collection(&rid);
                self.global.clear_collection_by_name(name);
                removed
            }
            None => 0,
        }
    }

    fn region_registry(&self, region: &str) -> Arc<SessionTokenRegistry> {
        if let Some(existing) = self.by_region.get(region) {
            return Arc::clone(existing.value());
        }
        let registry = self
            .by_region
            .entry(region.to_string())
            .or_insert_with(|| Arc::new(SessionTokenRegistry::new(self.regional_capacity)));
        Arc::clone(registry.value())
    }

    fn mask(&self, token: SessionToken, preferred_regions: &[String]) -> SessionToken {
        if !token.is_vector() || preferred_regions.is_empty() {
            return token;
        }

        let mut keep = HashSet::with_capacity(preferred_regions.len());
        for region in preferred_regions {
            match self.region_id(region) {
                Some(id) => {
                    keep.insert(id);
                }
                None => {
                    tracing::debug!(region = %region, "region has no id, sending unmasked session token");
                    return token;
                }
            }
        }
        token.with_regions_masked(&keep)
    }
}
