//! Candidate request model and query parsing.
//!
//! A request is a set of *resource groups* keyed by suffix (the empty
//! string for the unsuffixed group) plus request-wide parameters. Query
//! keys carry the suffix after the first `_`: `resources_COMPUTE` feeds
//! group `_COMPUTE`, bare `resources` feeds the empty-suffix group.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use claimgrid_core::names;

use crate::error::{CandidateError, CandidateResult};

/// Prefix introducing an any-of list in `required` and `member_of` values.
const IN_PREFIX: &str = "in:";

/// Qualitative constraints on a single provider.
///
/// `required` is AND over presence, `forbidden` AND over absence, and each
/// `any_of` set is an OR-group; the groups are ANDed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraitFilter {
    pub required: BTreeSet<String>,
    pub forbidden: BTreeSet<String>,
    pub any_of: Vec<BTreeSet<String>>,
}

impl TraitFilter {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.forbidden.is_empty() && self.any_of.is_empty()
    }
}

/// Aggregate membership constraints: AND over OR-groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateFilter {
    pub member_of: Vec<BTreeSet<Uuid>>,
}

impl AggregateFilter {
    pub fn is_empty(&self) -> bool {
        self.member_of.is_empty()
    }
}

/// One clause of a candidate request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestGroup {
    /// `""` for the unsuffixed group, otherwise `_SUFFIX` with the
    /// leading underscore.
    pub suffix: String,
    /// Requested amounts keyed by resource class.
    pub resources: BTreeMap<String, u64>,
    pub traits: TraitFilter,
    pub aggregates: AggregateFilter,
}

impl RequestGroup {
    fn with_suffix(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
            ..Self::default()
        }
    }

    /// A resourceless group constrains qualitatively but requests nothing;
    /// it is meaningful only as a locality anchor.
    pub fn is_resourceless(&self) -> bool {
        self.resources.is_empty()
    }
}

/// How distinct groups may share providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupPolicy {
    /// Distinct groups may land on the same provider.
    #[default]
    None,
    /// Resourceful groups must use pairwise-disjoint providers.
    Isolate,
}

/// A parsed candidate request.
#[derive(Debug, Clone, Default)]
pub struct CandidateRequest {
    /// Groups keyed by suffix (`""` = unsuffixed).
    pub groups: BTreeMap<String, RequestGroup>,
    /// Each clause lists suffixes whose providers must share a subtree.
    pub same_subtree: Vec<BTreeSet<String>>,
    /// Absent means `none`, but two or more suffixed groups require an
    /// explicit choice.
    pub group_policy: Option<GroupPolicy>,
    /// Requested cap on emitted allocation requests.
    pub limit: Option<usize>,
}

impl CandidateRequest {
    pub fn policy(&self) -> GroupPolicy {
        self.group_policy.unwrap_or_default()
    }

    /// Parse decoded query pairs into a request. Fails fast on malformed
    /// values; structural validation lives in [`CandidateRequest::validate`].
    pub fn parse(pairs: &[(&str, &str)]) -> CandidateResult<Self> {
        let mut request = CandidateRequest::default();
        for (key, value) in pairs {
            if let Some(suffix) = group_suffix(key, "resources")? {
                parse_resources(value, request.group_mut(&suffix))?;
            } else if let Some(suffix) = group_suffix(key, "required")? {
                parse_required(value, request.group_mut(&suffix))?;
            } else if let Some(suffix) = group_suffix(key, "member_of")? {
                parse_member_of(value, request.group_mut(&suffix))?;
            } else if *key == "same_subtree" {
                request.same_subtree.push(parse_same_subtree(value)?);
            } else if *key == "group_policy" {
                request.group_policy = Some(match *value {
                    "none" => GroupPolicy::None,
                    "isolate" => GroupPolicy::Isolate,
                    other => {
                        return Err(CandidateError::BadRequest(format!(
                            "group_policy must be none or isolate, got {other:?}"
                        )))
                    }
                });
            } else if *key == "limit" {
                let limit: usize = value.parse().map_err(|_| {
                    CandidateError::BadRequest(format!("limit must be a positive integer: {value:?}"))
                })?;
                if limit == 0 {
                    return Err(CandidateError::BadRequest(
                        "limit must be a positive integer".to_string(),
                    ));
                }
                request.limit = Some(limit);
            } else {
                return Err(CandidateError::BadRequest(format!(
                    "unrecognized parameter {key:?}"
                )));
            }
        }
        request.validate()?;
        Ok(request)
    }

    fn group_mut(&mut self, suffix: &str) -> &mut RequestGroup {
        self.groups
            .entry(suffix.to_string())
            .or_insert_with(|| RequestGroup::with_suffix(suffix))
    }

    /// Structural validation of an assembled request.
    pub fn validate(&self) -> CandidateResult<()> {
        if !self.groups.values().any(|g| !g.resources.is_empty()) {
            return Err(CandidateError::BadRequest(
                "at least one group must request resources".to_string(),
            ));
        }
        for clause in &self.same_subtree {
            for suffix in clause {
                if suffix.is_empty() {
                    return Err(CandidateError::BadRequest(
                        "same_subtree may not reference the unsuffixed group".to_string(),
                    ));
                }
                if !self.groups.contains_key(suffix) {
                    return Err(CandidateError::BadRequest(format!(
                        "same_subtree references unknown suffix {suffix:?}"
                    )));
                }
            }
        }
        for (suffix, group) in &self.groups {
            if suffix.is_empty() || !group.is_resourceless() {
                continue;
            }
            let anchored = self.same_subtree.iter().any(|c| c.contains(suffix))
                || !group.aggregates.is_empty();
            if !anchored {
                return Err(CandidateError::BadRequest(format!(
                    "resourceless group {suffix:?} needs member_of or a same_subtree clause"
                )));
            }
        }
        let suffixed = self.groups.keys().filter(|s| !s.is_empty()).count();
        if suffixed > 1 && self.group_policy.is_none() {
            return Err(CandidateError::MissingValue(
                "group_policy is required with multiple suffixed groups".to_string(),
            ));
        }
        Ok(())
    }
}

/// Match `key` against `base` or `base_SUFFIX`; returns the suffix
/// (empty string for the bare form).
fn group_suffix(key: &str, base: &str) -> CandidateResult<Option<String>> {
    if key == base {
        return Ok(Some(String::new()));
    }
    let Some(rest) = key.strip_prefix(base) else {
        return Ok(None);
    };
    if !rest.starts_with('_') {
        return Ok(None);
    }
    let body = &rest[1..];
    if body.is_empty()
        || !body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(CandidateError::BadRequest(format!(
            "malformed group suffix in {key:?}"
        )));
    }
    Ok(Some(rest.to_string()))
}

/// `RC:N,RC:N,…` — positive integer demand per resource class.
fn parse_resources(value: &str, group: &mut RequestGroup) -> CandidateResult<()> {
    if value.is_empty() {
        return Err(CandidateError::BadRequest(
            "empty resources value".to_string(),
        ));
    }
    for item in value.split(',') {
        let Some((resource_class, amount)) = item.split_once(':') else {
            return Err(CandidateError::BadRequest(format!(
                "resources entry {item:?} is not RC:N"
            )));
        };
        if !names::is_valid_symbol(resource_class) {
            return Err(CandidateError::BadRequest(format!(
                "malformed resource class {resource_class:?}"
            )));
        }
        let amount: u64 = amount.parse().map_err(|_| {
            CandidateError::BadRequest(format!("non-integer amount in {item:?}"))
        })?;
        if amount == 0 {
            return Err(CandidateError::BadRequest(format!(
                "zero amount for {resource_class}"
            )));
        }
        if group
            .resources
            .insert(resource_class.to_string(), amount)
            .is_some()
        {
            return Err(CandidateError::BadRequest(format!(
                "duplicate resource class {resource_class}"
            )));
        }
    }
    Ok(())
}

/// `T,!T,…` = AND of required/forbidden traits; `in:T1,T2,…` = one
/// any-of group. Occurrences of the parameter accumulate.
fn parse_required(value: &str, group: &mut RequestGroup) -> CandidateResult<()> {
    if value.is_empty() {
        return Err(CandidateError::BadRequest("empty required value".to_string()));
    }
    if let Some(rest) = value.strip_prefix(IN_PREFIX) {
        let mut any_of = BTreeSet::new();
        for name in rest.split(',') {
            any_of.insert(parse_trait_name(name)?);
        }
        group.traits.any_of.push(any_of);
        return Ok(());
    }
    for token in value.split(',') {
        if let Some(name) = token.strip_prefix('!') {
            group.traits.forbidden.insert(parse_trait_name(name)?);
        } else {
            group.traits.required.insert(parse_trait_name(token)?);
        }
    }
    Ok(())
}

fn parse_trait_name(name: &str) -> CandidateResult<String> {
    if !names::is_valid_symbol(name) {
        return Err(CandidateError::BadRequest(format!(
            "malformed trait name {name:?}"
        )));
    }
    Ok(name.to_string())
}

/// `agg,agg` = AND of single memberships; `in:agg,agg,…` = one OR-group.
fn parse_member_of(value: &str, group: &mut RequestGroup) -> CandidateResult<()> {
    if value.is_empty() {
        return Err(CandidateError::BadRequest(
            "empty member_of value".to_string(),
        ));
    }
    if let Some(rest) = value.strip_prefix(IN_PREFIX) {
        let mut any_of = BTreeSet::new();
        for raw in rest.split(',') {
            any_of.insert(parse_aggregate(raw)?);
        }
        group.aggregates.member_of.push(any_of);
        return Ok(());
    }
    for raw in value.split(',') {
        let mut single = BTreeSet::new();
        single.insert(parse_aggregate(raw)?);
        group.aggregates.member_of.push(single);
    }
    Ok(())
}

fn parse_aggregate(raw: &str) -> CandidateResult<Uuid> {
    raw.parse().map_err(|_| {
        CandidateError::BadRequest(format!("malformed aggregate uuid {raw:?}"))
    })
}

/// `_S1,_S2,…` — suffixes whose providers must share a subtree.
fn parse_same_subtree(value: &str) -> CandidateResult<BTreeSet<String>> {
    let mut clause = BTreeSet::new();
    for token in value.split(',') {
        if token.is_empty() || !token.starts_with('_') {
            return Err(CandidateError::BadRequest(format!(
                "same_subtree suffix {token:?} is empty or unsuffixed"
            )));
        }
        clause.insert(token.to_string());
    }
    Ok(clause)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> CandidateResult<CandidateRequest> {
        CandidateRequest::parse(pairs)
    }

    #[test]
    fn parses_suffixed_and_unsuffixed_groups() {
        let request = parse(&[
            ("resources", "VCPU:1,MEMORY_MB:1024"),
            ("resources_ACCEL", "CUSTOM_FPGA:1"),
            ("required_ACCEL", "CUSTOM_PROGRAMMABLE"),
        ])
        .unwrap();

        assert_eq!(request.groups.len(), 2);
        let root = &request.groups[""];
        assert_eq!(root.resources["VCPU"], 1);
        assert_eq!(root.resources["MEMORY_MB"], 1024);

        let accel = &request.groups["_ACCEL"];
        assert_eq!(accel.suffix, "_ACCEL");
        assert_eq!(accel.resources["CUSTOM_FPGA"], 1);
        assert!(accel.traits.required.contains("CUSTOM_PROGRAMMABLE"));
    }

    #[test]
    fn forbidden_and_any_of_traits() {
        let request = parse(&[
            ("resources", "VCPU:1"),
            ("required", "HW_CPU_X86_AVX2,!CUSTOM_SLOW"),
            ("required", "in:CUSTOM_A,CUSTOM_B"),
        ])
        .unwrap();

        let group = &request.groups[""];
        assert!(group.traits.required.contains("HW_CPU_X86_AVX2"));
        assert!(group.traits.forbidden.contains("CUSTOM_SLOW"));
        assert_eq!(group.traits.any_of.len(), 1);
        assert!(group.traits.any_of[0].contains("CUSTOM_B"));
    }

    #[test]
    fn member_of_is_and_of_or_groups() {
        let agg1 = Uuid::from_u128(1).to_string();
        let agg2 = Uuid::from_u128(2).to_string();
        let request = parse(&[
            ("resources", "VCPU:1"),
            ("member_of", &format!("{agg1},{agg2}")),
            ("member_of", &format!("in:{agg1},{agg2}")),
        ])
        .unwrap();

        let filter = &request.groups[""].aggregates;
        // Two singletons from the first occurrence, one OR-pair from the second.
        assert_eq!(filter.member_of.len(), 3);
        assert_eq!(filter.member_of[2].len(), 2);
    }

    #[test]
    fn same_subtree_accumulates_clauses() {
        let request = parse(&[
            ("resources_A", "VCPU:1"),
            ("resources_B", "MEMORY_MB:128"),
            ("group_policy", "none"),
            ("same_subtree", "_A,_B"),
            ("same_subtree", "_A"),
        ])
        .unwrap();

        assert_eq!(request.same_subtree.len(), 2);
        assert!(request.same_subtree[0].contains("_A"));
        assert!(request.same_subtree[0].contains("_B"));
    }

    #[test]
    fn empty_same_subtree_suffix_is_bad_request() {
        let err = parse(&[
            ("resources_A", "VCPU:1"),
            ("resources_B", "MEMORY_MB:128"),
            ("group_policy", "none"),
            ("same_subtree", "_A,,_B"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "placement.query.bad_value");
    }

    #[test]
    fn same_subtree_must_reference_known_suffixes() {
        let err = parse(&[
            ("resources_A", "VCPU:1"),
            ("same_subtree", "_A,_GHOST"),
        ])
        .unwrap_err();
        assert!(matches!(err, CandidateError::BadRequest(_)));
    }

    #[test]
    fn unanchored_resourceless_group_is_bad_request() {
        let err = parse(&[
            ("resources_A", "VCPU:1"),
            ("required_B", "COMPUTE_VOLUME_MULTI_ATTACH"),
            ("group_policy", "none"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "placement.query.bad_value");
    }

    #[test]
    fn resourceless_group_with_member_of_is_allowed() {
        let agg = Uuid::from_u128(7).to_string();
        let request = parse(&[
            ("resources_A", "VCPU:1"),
            ("member_of_B", &agg),
            ("group_policy", "none"),
        ])
        .unwrap();
        assert!(request.groups["_B"].is_resourceless());
    }

    #[test]
    fn all_resourceless_request_is_bad_request() {
        let err = parse(&[("required_A", "CUSTOM_FOO"), ("same_subtree", "_A")]).unwrap_err();
        assert!(matches!(err, CandidateError::BadRequest(_)));
    }

    #[test]
    fn multiple_suffixed_groups_need_group_policy() {
        let err = parse(&[
            ("resources_A", "VCPU:1"),
            ("resources_B", "MEMORY_MB:128"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "placement.query.missing_value");
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(parse(&[("resources", "VCPU")]).is_err());
        assert!(parse(&[("resources", "VCPU:0")]).is_err());
        assert!(parse(&[("resources", "VCPU:one")]).is_err());
        assert!(parse(&[("resources", "vcpu:1")]).is_err());
        assert!(parse(&[("resources", "VCPU:1"), ("required", "bad-trait")]).is_err());
        assert!(parse(&[("resources", "VCPU:1"), ("member_of", "not-a-uuid")]).is_err());
        assert!(parse(&[("resources", "VCPU:1"), ("group_policy", "both")]).is_err());
        assert!(parse(&[("resources", "VCPU:1"), ("limit", "0")]).is_err());
        assert!(parse(&[("resources", "VCPU:1"), ("frobnicate", "yes")]).is_err());
    }

    #[test]
    fn duplicate_resource_class_rejected() {
        let err = parse(&[("resources", "VCPU:1,VCPU:2")]).unwrap_err();
        assert!(matches!(err, CandidateError::BadRequest(_)));
    }

    #[test]
    fn policy_defaults_to_none() {
        let request = parse(&[("resources", "VCPU:1")]).unwrap();
        assert_eq!(request.policy(), GroupPolicy::None);
        assert!(request.group_policy.is_none());
    }
}
