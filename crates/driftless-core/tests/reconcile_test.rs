#![allow(clippy::unwrap_used)]
// Integration tests for `Reconciler` against an instrumented in-memory remote.

mod common;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use driftless_api::{LifecycleState, VersionToken};
use driftless_core::{
    ApplyOrder, BackoffConfig, CoreError, FieldWriter, InterfaceAddress, Keyed, LockTable,
    PrefixListEntry, Protocol, Reconcilable, ReconcileConfig, ReconcilePolicy, Reconciler,
    RuleDirection, SecurityGroupRule, WaitConfig,
};
use pretty_assertions::assert_eq;

use common::{Call, FakeRemote, Fault, ReadFault};

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> ReconcileConfig {
    ReconcileConfig {
        max_attempts: 5,
        read_retries: 3,
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        settle: WaitConfig::new(Duration::from_secs(1), Duration::from_millis(50)),
    }
}

fn reconciler<E>(remote: FakeRemote<E>) -> Reconciler<FakeRemote<E>> {
    Reconciler::new(remote, Arc::new(LockTable::per_key()), config())
}

fn rule_a() -> SecurityGroupRule {
    SecurityGroupRule::ingress(Protocol::Tcp, 80, 8000).cidr("10.0.0.0/8")
}

fn rule_b() -> SecurityGroupRule {
    SecurityGroupRule::ingress(Protocol::Tcp, 22, 22).cidr("192.168.0.0/16")
}

fn mutate(op: &'static str, len: usize, version: Option<u64>) -> Call {
    Call::Mutate {
        op,
        len,
        version: version.map(VersionToken),
    }
}

/// Declares a `key=value` tag type keyed by `key` alone, so a changed value
/// is payload drift.
macro_rules! tag_type {
    ($name:ident, $kind:literal, $policy:expr) => {
        #[derive(Debug, Clone, PartialEq)]
        struct $name {
            key: &'static str,
            value: &'static str,
        }

        impl $name {
            fn new(key: &'static str, value: &'static str) -> Self {
                Self { key, value }
            }
        }

        impl Keyed for $name {
            const KIND: &'static str = $kind;

            fn write_identity(&self, fields: &mut FieldWriter) {
                fields.scalar("key", self.key);
            }
        }

        impl Reconcilable for $name {
            const POLICY: ReconcilePolicy = $policy;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}={}", self.key, self.value)
            }
        }
    };
}

tag_type!(ReplacedTag, "rtag", ReconcilePolicy::replace());
tag_type!(
    SurgeTag,
    "stag",
    ReconcilePolicy::incremental(ApplyOrder::AddThenRemove)
);
tag_type!(
    LooseTag,
    "ltag",
    ReconcilePolicy::incremental(ApplyOrder::RemoveThenAdd)
);

// ── Delta scenarios ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_adds_rule_to_empty_group() {
    let r = reconciler(FakeRemote::new(vec![]));

    let out = r.reconcile("sg-1", vec![rule_a()]).await.unwrap();

    assert_eq!(r.client().mutations(), vec![mutate("add", 1, None)]);
    assert_eq!(out.applied.added, 1);
    assert_eq!(out.applied.removed, 0);
    assert_eq!(out.elements, vec![rule_a()]);
}

#[tokio::test(start_paused = true)]
async fn test_removes_undesired_rule() {
    let r = reconciler(FakeRemote::new(vec![rule_a(), rule_b()]));

    let out = r.reconcile("sg-1", vec![rule_a()]).await.unwrap();

    assert_eq!(r.client().mutations(), vec![mutate("remove", 1, None)]);
    assert_eq!(out.applied.removed, 1);
    assert_eq!(out.elements, vec![rule_a()]);
}

#[tokio::test(start_paused = true)]
async fn test_reordered_addresses_with_same_primary_are_converged() {
    let ip1 = InterfaceAddress::private_ipv4("10.0.0.1").as_primary();
    let ip2 = InterfaceAddress::private_ipv4("10.0.0.2");
    let ip3 = InterfaceAddress::private_ipv4("10.0.0.3");
    let r = reconciler(FakeRemote::new(vec![ip1.clone(), ip2.clone(), ip3.clone()]));

    let out = r.reconcile("eni-1", vec![ip2, ip1, ip3]).await.unwrap();

    assert!(out.applied.is_noop());
    assert_eq!(r.client().calls(), vec![Call::Read]);
}

#[tokio::test(start_paused = true)]
async fn test_primary_change_requires_replacement() {
    let ip1 = InterfaceAddress::private_ipv4("10.0.0.1").as_primary();
    let ip2 = InterfaceAddress::private_ipv4("10.0.0.2");
    let ip4 = InterfaceAddress::private_ipv4("10.0.0.4").as_primary();
    let r = reconciler(FakeRemote::new(vec![ip1, ip2.clone()]));

    let err = r.reconcile("eni-1", vec![ip4, ip2]).await.unwrap_err();

    match err {
        CoreError::ReplacePrimary {
            parent,
            previous,
            desired,
        } => {
            assert_eq!(parent, "eni-1");
            assert_eq!(previous, "10.0.0.1 (primary)");
            assert_eq!(desired, "10.0.0.4 (primary)");
        }
        other => panic!("expected ReplacePrimary, got {other:?}"),
    }
    assert!(r.client().mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ipv6_only_interface_has_no_primary_to_protect() {
    let a = InterfaceAddress::ipv6("2001:db8::a");
    let b = InterfaceAddress::ipv6("2001:db8::b");
    let r = reconciler(FakeRemote::new(vec![a, b.clone()]));

    let out = r.reconcile("eni-1", vec![b.clone()]).await.unwrap();

    assert_eq!(r.client().mutations(), vec![mutate("remove", 1, None)]);
    assert_eq!(out.elements, vec![b]);
}

#[tokio::test(start_paused = true)]
async fn test_leading_prefix_is_not_taken_for_the_primary_address() {
    let prefix = InterfaceAddress::ipv4_prefix("10.0.0.16/28");
    let ip1 = InterfaceAddress::private_ipv4("10.0.0.1");
    let r = reconciler(FakeRemote::new(vec![prefix, ip1.clone()]));

    let out = r.reconcile("eni-1", vec![ip1.clone()]).await.unwrap();

    assert_eq!(r.client().mutations(), vec![mutate("remove", 1, None)]);
    assert_eq!(out.elements, vec![ip1]);
}

#[tokio::test(start_paused = true)]
async fn test_version_conflicts_retry_from_fresh_read() {
    let remote = FakeRemote::versioned(vec![PrefixListEntry::new("10.0.0.0/8")], 7)
        .with_mutation_faults([Some(Fault::Conflict), Some(Fault::Conflict)]);
    let r = reconciler(remote);

    let desired = vec![
        PrefixListEntry::new("10.0.0.0/8"),
        PrefixListEntry::new("172.16.0.0/12"),
    ];
    let out = r.reconcile("pl-1", desired).await.unwrap();

    // Three planning reads, each followed by a mutation carrying the token
    // it read; then the settle poll and the confirmation read.
    assert_eq!(
        r.client().calls(),
        vec![
            Call::Read,
            mutate("modify", 1, Some(7)),
            Call::Read,
            mutate("modify", 1, Some(8)),
            Call::Read,
            mutate("modify", 1, Some(9)),
            Call::Poll,
            Call::Read,
        ]
    );
    let calls = r.client().calls();
    let last_mutation = calls.iter().rposition(Call::is_mutate).unwrap();
    let planning_reads = calls[..last_mutation]
        .iter()
        .filter(|c| **c == Call::Read)
        .count();
    assert_eq!(planning_reads, 3);
    assert_eq!(r.client().reads(), 4);
    assert_eq!(out.applied.attempts, 3);
    assert_eq!(out.applied.calls, 1);
    assert_eq!(out.version, Some(VersionToken(10)));
    assert_eq!(out.elements.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_incremental_pass_carries_returned_version_token() {
    let ip1 = InterfaceAddress::private_ipv4("10.0.0.1").as_primary();
    let mut desired = vec![ip1.clone()];
    desired.extend((2..=8).map(|i| InterfaceAddress::private_ipv4(format!("10.0.0.{i}"))));
    let r = reconciler(FakeRemote::versioned(vec![ip1], 1));

    let out = r.reconcile("eni-1", desired).await.unwrap();

    // Seven one-per-call assignments in a single pass, each conditioned on
    // the token the previous call returned. No conflict budget is spent.
    let expected: Vec<Call> = (1..=7).map(|v| mutate("add", 1, Some(v))).collect();
    assert_eq!(r.client().mutations(), expected);
    assert_eq!(r.client().reads(), 2);
    assert_eq!(out.applied.attempts, 1);
    assert_eq!(out.applied.calls, 7);
    assert_eq!(out.version, Some(VersionToken(8)));
    assert_eq!(out.elements.len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_unreported_version_replans_without_spending_conflict_budget() {
    let ip1 = InterfaceAddress::private_ipv4("10.0.0.1").as_primary();
    let ip2 = InterfaceAddress::private_ipv4("10.0.0.2");
    let ip3 = InterfaceAddress::private_ipv4("10.0.0.3");
    let remote = FakeRemote::versioned(vec![ip1.clone()], 1).without_version_echo();
    let r = Reconciler::new(
        remote,
        Arc::new(LockTable::per_key()),
        ReconcileConfig {
            max_attempts: 1,
            ..config()
        },
    );

    let out = r.reconcile("eni-1", vec![ip1, ip2, ip3]).await.unwrap();

    assert_eq!(
        r.client().calls(),
        vec![
            Call::Read,
            mutate("add", 1, Some(1)),
            Call::Read,
            mutate("add", 1, Some(2)),
            Call::Poll,
            Call::Read,
        ]
    );
    assert_eq!(out.applied.attempts, 2);
    assert_eq!(out.applied.calls, 2);
    assert_eq!(out.elements.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_budget_is_bounded() {
    let remote = FakeRemote::versioned(vec![], 1)
        .with_mutation_faults([Some(Fault::Conflict); 10]);
    let r = Reconciler::new(
        remote,
        Arc::new(LockTable::per_key()),
        ReconcileConfig {
            max_attempts: 3,
            ..config()
        },
    );

    let err = r
        .reconcile("pl-1", vec![PrefixListEntry::new("10.0.0.0/8")])
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            CoreError::VersionConflictExhausted {
                attempts: 3,
                operation: "modify",
                ..
            }
        ),
        "got {err:?}"
    );
    assert_eq!(r.client().mutations().len(), 3);
}

// ── Idempotence ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_second_reconcile_is_a_noop() {
    let r = reconciler(FakeRemote::new(vec![rule_b()]));
    let desired = vec![rule_a()];

    r.reconcile("sg-1", desired.clone()).await.unwrap();
    let before = r.client().calls().len();

    let out = r.reconcile("sg-1", desired).await.unwrap();

    assert!(out.applied.is_noop());
    assert_eq!(&r.client().calls()[before..], &[Call::Read]);
}

#[tokio::test(start_paused = true)]
async fn test_already_converged_costs_one_read() {
    let r = reconciler(FakeRemote::versioned(
        vec![PrefixListEntry::new("10.0.0.0/8")],
        3,
    ));

    let out = r
        .reconcile("pl-1", vec![PrefixListEntry::new("10.0.0.0/8")])
        .await
        .unwrap();

    assert_eq!(r.client().calls(), vec![Call::Read]);
    assert_eq!(out.version, Some(VersionToken(3)));
}

// ── Ordering policies ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_rules_are_revoked_before_authorized() {
    let r = reconciler(FakeRemote::new(vec![rule_b()]));

    r.reconcile("sg-1", vec![rule_a()]).await.unwrap();

    assert_eq!(
        r.client().mutations(),
        vec![mutate("remove", 1, None), mutate("add", 1, None)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_secondary_addresses_are_assigned_one_per_call_in_order() {
    let ip1 = InterfaceAddress::private_ipv4("10.0.0.1").as_primary();
    let ip2 = InterfaceAddress::private_ipv4("10.0.0.2");
    let ip3 = InterfaceAddress::private_ipv4("10.0.0.3");
    let stale = InterfaceAddress::private_ipv4("10.0.0.9");
    let r = reconciler(FakeRemote::new(vec![ip1.clone(), stale]));

    r.reconcile("eni-1", vec![ip1.clone(), ip3.clone(), ip2.clone()])
        .await
        .unwrap();

    assert_eq!(
        r.client().mutations(),
        vec![
            mutate("remove", 1, None),
            mutate("add", 1, None),
            mutate("add", 1, None)
        ]
    );
    let order: Vec<String> = r
        .client()
        .elements()
        .iter()
        .map(|a| a.address.clone())
        .collect();
    assert_eq!(order, vec!["10.0.0.1", "10.0.0.3", "10.0.0.2"]);
}

#[tokio::test(start_paused = true)]
async fn test_replace_sends_whole_collection_with_token() {
    let remote = FakeRemote::versioned(
        vec![ReplacedTag::new("a", "1"), ReplacedTag::new("b", "1")],
        4,
    );
    let r = reconciler(remote);
    let desired = vec![ReplacedTag::new("a", "1"), ReplacedTag::new("c", "1")];

    let out = r.reconcile("lt-1", desired.clone()).await.unwrap();

    assert_eq!(
        r.client().calls(),
        vec![
            Call::Read,
            mutate("replace", 2, Some(4)),
            Call::Poll,
            Call::Read
        ]
    );
    assert_eq!(r.client().elements(), desired);
    assert_eq!(out.applied.added, 1);
    assert_eq!(out.applied.removed, 1);
    assert_eq!(out.applied.calls, 1);
    assert_eq!(out.version, Some(VersionToken(5)));
}

#[tokio::test(start_paused = true)]
async fn test_additions_land_before_removals() {
    let remote = FakeRemote::versioned(vec![SurgeTag::new("a", "1"), SurgeTag::new("b", "1")], 1);
    let r = reconciler(remote);

    let out = r
        .reconcile("tg-1", vec![SurgeTag::new("a", "1"), SurgeTag::new("c", "1")])
        .await
        .unwrap();

    assert_eq!(
        r.client().mutations(),
        vec![mutate("add", 1, Some(1)), mutate("remove", 1, Some(2))]
    );
    assert_eq!(
        out.elements,
        vec![SurgeTag::new("a", "1"), SurgeTag::new("c", "1")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_ignored_drift_is_a_warning_without_calls() {
    let r = reconciler(FakeRemote::new(vec![LooseTag::new("a", "old")]));

    let out = r
        .reconcile("tg-1", vec![LooseTag::new("a", "new")])
        .await
        .unwrap();

    assert!(out.applied.is_noop());
    assert_eq!(r.client().calls(), vec![Call::Read]);
    assert_eq!(out.warnings.len(), 1, "{:?}", out.warnings);
    assert!(out.warnings[0].contains("non-identity"));
    assert_eq!(out.elements, vec![LooseTag::new("a", "old")]);
}

#[tokio::test(start_paused = true)]
async fn test_ignored_drift_is_reported_alongside_other_changes() {
    let r = reconciler(FakeRemote::new(vec![LooseTag::new("a", "old")]));

    let out = r
        .reconcile(
            "tg-1",
            vec![LooseTag::new("a", "new"), LooseTag::new("b", "1")],
        )
        .await
        .unwrap();

    assert_eq!(r.client().mutations(), vec![mutate("add", 1, None)]);
    assert_eq!(out.applied.added, 1);
    assert_eq!(out.warnings.len(), 1, "{:?}", out.warnings);
    assert!(out.warnings[0].contains("non-identity"));
    assert_eq!(
        r.client().elements(),
        vec![LooseTag::new("a", "old"), LooseTag::new("b", "1")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_description_change_recreates_rule() {
    let r = reconciler(FakeRemote::new(vec![rule_a().description("old")]));

    let out = r
        .reconcile("sg-1", vec![rule_a().description("new")])
        .await
        .unwrap();

    assert_eq!(out.applied.recreated, 1);
    assert_eq!(
        r.client().mutations(),
        vec![mutate("remove", 1, None), mutate("add", 1, None)]
    );
    assert_eq!(out.elements[0].description.as_deref(), Some("new"));
}

#[tokio::test(start_paused = true)]
async fn test_multi_source_rule_is_expanded_and_collapsed() {
    let existing = SecurityGroupRule::ingress(Protocol::Tcp, 443, 443).cidr("10.0.0.0/8");
    let r = reconciler(FakeRemote::new(vec![existing]));

    let desired = SecurityGroupRule::ingress(Protocol::Tcp, 443, 443)
        .cidr("10.0.0.0/8")
        .cidr("172.16.0.0/12")
        .group("sg-peer");
    let out = r.reconcile("sg-1", vec![desired]).await.unwrap();

    // Two new sources, sent as a single permission.
    assert_eq!(r.client().mutations(), vec![mutate("add", 1, None)]);
    assert_eq!(out.applied.added, 2);
    assert_eq!(out.elements.len(), 3);
}

// ── Failure semantics ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_partial_apply_names_completed_steps() {
    let remote = FakeRemote::new(vec![rule_b()]).with_mutation_faults([None, Some(Fault::Reject)]);
    let r = reconciler(remote);

    let err = r.reconcile("sg-1", vec![rule_a()]).await.unwrap_err();

    match err {
        CoreError::PartialApply {
            parent,
            completed,
            failed,
            source,
        } => {
            assert_eq!(parent, "sg-1");
            assert_eq!(completed, vec!["remove 1".to_owned()]);
            assert_eq!(failed, "add 1");
            assert!(matches!(*source, CoreError::Permanent { .. }));
        }
        other => panic!("expected PartialApply, got {other:?}"),
    }
    // True remote state: the removal landed, the addition did not.
    assert!(r.client().elements().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let remote = FakeRemote::new(vec![]).with_mutation_faults([Some(Fault::Reject)]);
    let r = reconciler(remote);

    let err = r.reconcile("sg-1", vec![rule_a()]).await.unwrap_err();

    assert!(matches!(err, CoreError::Permanent { .. }), "got {err:?}");
    assert_eq!(r.client().mutations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_of_own_prior_attempt_is_a_warning() {
    // The first read lags behind an earlier successful add.
    let remote = FakeRemote::new(vec![rule_a()]).with_read_faults([ReadFault::Stale(vec![])]);
    let r = reconciler(remote);

    let out = r.reconcile("sg-1", vec![rule_a()]).await.unwrap();

    assert_eq!(out.warnings.len(), 1, "{:?}", out.warnings);
    assert!(out.warnings[0].contains("already applied"));
    assert_eq!(out.elements, vec![rule_a()]);
}

#[tokio::test(start_paused = true)]
async fn test_removal_of_vanished_rule_is_a_warning() {
    let remote = FakeRemote::new(vec![]).with_read_faults([ReadFault::Stale(vec![rule_b()])]);
    let r = reconciler(remote);

    let out = r.reconcile("sg-1", vec![]).await.unwrap();

    assert_eq!(out.warnings.len(), 1);
    assert!(out.elements.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_parent_is_fatal_and_not_retried() {
    let r = reconciler(FakeRemote::<PrefixListEntry>::missing());

    let err = r
        .reconcile("pl-gone", vec![PrefixListEntry::new("10.0.0.0/8")])
        .await
        .unwrap_err();

    assert!(err.is_not_found(), "got {err:?}");
    assert_eq!(r.client().calls(), vec![Call::Read]);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_read_is_retried() {
    let remote = FakeRemote::new(vec![]).with_read_faults([ReadFault::Throttle]);
    let r = reconciler(remote);

    r.reconcile("sg-1", vec![rule_a()]).await.unwrap();

    assert_eq!(r.client().calls()[..3], [
        Call::Read,
        Call::Read,
        mutate("add", 1, None)
    ]);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_mutation_restarts_from_fresh_read() {
    let remote = FakeRemote::new(vec![]).with_mutation_faults([Some(Fault::Throttle)]);
    let r = reconciler(remote);

    let out = r.reconcile("sg-1", vec![rule_a()]).await.unwrap();

    assert_eq!(out.applied.attempts, 2);
    assert_eq!(r.client().calls()[..4], [
        Call::Read,
        mutate("add", 1, None),
        Call::Read,
        mutate("add", 1, None)
    ]);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_element_fails_before_any_call() {
    let bad = SecurityGroupRule::new(RuleDirection::Ingress, Protocol::All, 80, 80).cidr("10.0.0.0/8");
    let r = reconciler(FakeRemote::new(vec![]));

    let err = r.reconcile("sg-1", vec![bad]).await.unwrap_err();

    assert!(matches!(err, CoreError::Validation { .. }));
    assert!(r.client().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_duplicates_are_rejected() {
    let r = reconciler(FakeRemote::new(vec![]));

    let err = r
        .reconcile(
            "sg-1",
            vec![rule_a().description("one"), rule_a().description("two")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::DuplicateElement { .. }));
    assert!(r.client().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exact_duplicates_are_folded() {
    let r = reconciler(FakeRemote::new(vec![]));

    let out = r.reconcile("sg-1", vec![rule_a(), rule_a()]).await.unwrap();

    assert_eq!(out.elements.len(), 1);
    assert_eq!(out.applied.added, 1);
}

// ── Settle wait ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_settle_waits_for_modification() {
    let remote = FakeRemote::versioned(vec![], 1).with_poll_states([
        LifecycleState::Modifying,
        LifecycleState::Modifying,
        LifecycleState::Available,
    ]);
    let r = reconciler(remote);

    r.reconcile("pl-1", vec![PrefixListEntry::new("10.0.0.0/8")])
        .await
        .unwrap();

    let polls = r.client().calls().iter().filter(|c| **c == Call::Poll).count();
    assert_eq!(polls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_settle_timeout_reports_applied_changes() {
    let remote = FakeRemote::versioned(vec![], 1).with_poll_states([LifecycleState::Modifying]);
    let r = reconciler(remote);

    let err = r
        .reconcile("pl-1", vec![PrefixListEntry::new("10.0.0.0/8")])
        .await
        .unwrap_err();

    match err {
        CoreError::PartialApply {
            completed, source, ..
        } => {
            assert_eq!(completed, vec!["modify 1".to_owned()]);
            assert!(source.is_indeterminate(), "got {source:?}");
        }
        other => panic!("expected PartialApply, got {other:?}"),
    }
    // The change landed; only its settling is unknown.
    assert_eq!(r.client().elements().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_settle_is_an_abort() {
    let remote = FakeRemote::versioned(vec![], 1).with_poll_states([LifecycleState::Failed]);
    let r = reconciler(remote);

    let err = r
        .reconcile("pl-1", vec![PrefixListEntry::new("10.0.0.0/8")])
        .await
        .unwrap_err();

    assert!(
        matches!(err, CoreError::PartialApply { ref source, .. } if matches!(**source, CoreError::AbortState { .. })),
        "got {err:?}"
    );
}

// ── Mutual exclusion ────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_parent_reconciles_never_overlap() {
    let remote = FakeRemote::versioned(vec![], 1).with_mutate_delay(Duration::from_millis(5));
    let r = Arc::new(reconciler(remote));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let r = Arc::clone(&r);
            tokio::spawn(async move {
                let entry = PrefixListEntry::new(format!("10.{i}.0.0/16"));
                r.reconcile("pl-shared", vec![entry]).await
            })
        })
        .collect();

    for joined in futures_util::future::join_all(tasks).await {
        let out = joined.unwrap().unwrap();
        assert_eq!(out.elements.len(), 1);
    }

    assert!(!r.client().overlapped(), "mutations overlapped under one scope");
    // Serialized writers never race on the version token.
    assert_eq!(r.client().mutations().len(), 8);
    assert_eq!(r.client().elements().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_lock_table_serializes_across_reconcilers() {
    let locks = Arc::new(LockTable::per_key());
    let remote = Arc::new(
        FakeRemote::<PrefixListEntry>::versioned(vec![], 1)
            .with_mutate_delay(Duration::from_millis(5)),
    );

    // Two reconcilers over the same remote, sharing only the lock table.
    let a = Arc::new(Reconciler::new(SharedRemote(Arc::clone(&remote)), Arc::clone(&locks), config()));
    let b = Arc::new(Reconciler::new(SharedRemote(Arc::clone(&remote)), locks, config()));

    let ta = {
        let a = Arc::clone(&a);
        tokio::spawn(async move {
            a.reconcile("pl-1", vec![PrefixListEntry::new("10.1.0.0/16")])
                .await
        })
    };
    let tb = {
        let b = Arc::clone(&b);
        tokio::spawn(async move {
            b.reconcile("pl-1", vec![PrefixListEntry::new("10.2.0.0/16")])
                .await
        })
    };

    ta.await.unwrap().unwrap();
    tb.await.unwrap().unwrap();
    assert!(!remote.overlapped());
    // Neither writer saw a stale token, so each needed exactly one call.
    assert_eq!(remote.mutations().len(), 2);
    assert_eq!(remote.version(), 3);
}

/// Lets two reconcilers drive one in-memory remote.
struct SharedRemote(Arc<FakeRemote<PrefixListEntry>>);

impl driftless_api::StatePoller for SharedRemote {
    type State = LifecycleState;

    async fn poll_state(&self, id: &str) -> Result<LifecycleState, driftless_api::Error> {
        self.0.poll_state(id).await
    }
}

impl driftless_api::CollectionClient<PrefixListEntry> for SharedRemote {
    async fn read(
        &self,
        parent: &str,
    ) -> Result<driftless_api::Observed<PrefixListEntry>, driftless_api::Error> {
        self.0.read(parent).await
    }

    async fn mutate(
        &self,
        parent: &str,
        mutation: driftless_api::Mutation<PrefixListEntry>,
    ) -> Result<Option<VersionToken>, driftless_api::Error> {
        self.0.mutate(parent, mutation).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_keys_match_between_desired_and_confirmed() {
    let r = reconciler(FakeRemote::new(vec![]));
    let desired = vec![rule_a(), rule_b()];

    let out = r.reconcile("sg-1", desired.clone()).await.unwrap();

    let mut want: Vec<_> = desired.iter().map(Keyed::synthetic_key).collect();
    let mut got: Vec<_> = out.elements.iter().map(Keyed::synthetic_key).collect();
    want.sort();
    got.sort();
    assert_eq!(want, got);
}
