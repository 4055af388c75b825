//! The reactive decision pipeline.
//!
//! One subscription runs through the states Idle, Matching, Combining and
//! Emitting: match the canonical index, open one live body evaluation per
//! matched policy, recombine with the configured combining algorithm on
//! every upstream emission, and emit the result when it differs from the
//! previously emitted decision. A swap of the index snapshot sends the
//! pipeline back to Matching; dropping the decision stream disposes it and
//! cancels every attribute subscription it opened.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value as Json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use warden_core::{AuthorizationDecision, AuthorizationSubscription, Val, VariableContext};
use warden_index::{CanonicalIndexContainer, PolicyRetrievalResult};
use warden_lang::{
    AttributeRegistry, EvaluationContext, FunctionLibrary, Policy, combine_latest_all,
};

use crate::combining::CombiningAlgorithm;
use crate::config::PdpConfig;
use crate::retrieval::{PolicyRetrievalPoint, PolicySource};

/// The policy decision point.
///
/// Owns the retrieval point, the collaborator registries and the
/// configuration; hands out one [`DecisionStream`] per subscription.
#[derive(Debug)]
pub struct PolicyDecisionPoint {
    config: PdpConfig,
    retrieval: PolicyRetrievalPoint,
    attributes: Arc<AttributeRegistry>,
    functions: Arc<FunctionLibrary>,
}

impl PolicyDecisionPoint {
    /// Start assembling a decision point
    #[must_use]
    pub fn builder() -> PdpBuilder {
        PdpBuilder::default()
    }

    /// Open a continuous decision stream for the subscription.
    ///
    /// The first decision is emitted as soon as it is computable;
    /// subsequent decisions replace it whenever the matched policy set or
    /// any contributing attribute changes. The stream runs until dropped.
    #[must_use]
    pub fn decide(&self, subscription: AuthorizationSubscription) -> DecisionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let variables = VariableContext::from_subscription(&subscription)
            .with_variables(self.config.variables.clone());
        let variables = match variables {
            Ok(variables) => variables,
            Err(error) => {
                warn!(%error, "subscription rejected, environment variables invalid");
                let _ = tx.send(AuthorizationDecision::indeterminate());
                return DecisionStream { rx, task: None };
            }
        };
        let ctx = EvaluationContext::new(
            variables,
            self.attributes.clone(),
            self.functions.clone(),
        );
        let snapshots = self.retrieval.subscribe();
        let algorithm = self.config.combining_algorithm;
        let task = tokio::spawn(drive(ctx, snapshots, algorithm, tx));
        DecisionStream {
            rx,
            task: Some(task),
        }
    }

    /// The retrieval point serving this decision point
    #[must_use]
    pub fn retrieval_point(&self) -> &PolicyRetrievalPoint {
        &self.retrieval
    }
}

/// Builder wiring configuration, policy source and collaborator
/// registries into a [`PolicyDecisionPoint`].
#[derive(Debug, Default)]
pub struct PdpBuilder {
    config: PdpConfig,
    attributes: Arc<AttributeRegistry>,
    functions: Arc<FunctionLibrary>,
}

impl PdpBuilder {
    /// Set the configuration
    #[must_use]
    pub fn with_config(mut self, config: PdpConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the attribute source registry
    #[must_use]
    pub fn with_attributes(mut self, attributes: Arc<AttributeRegistry>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the function library
    #[must_use]
    pub fn with_functions(mut self, functions: Arc<FunctionLibrary>) -> Self {
        self.functions = functions;
        self
    }

    /// Build a decision point fed by the given policy source.
    ///
    /// Must be called within a tokio runtime; the retrieval point spawns
    /// the task driving snapshot recompilation.
    #[must_use]
    pub fn build(self, source: &dyn PolicySource) -> PolicyDecisionPoint {
        let retrieval = PolicyRetrievalPoint::new(source, self.config.matching_mode);
        PolicyDecisionPoint {
            config: self.config,
            retrieval,
            attributes: self.attributes,
            functions: self.functions,
        }
    }

    /// Build a decision point over a fixed policy set.
    #[must_use]
    pub fn build_with_policies(self, policies: &[Arc<Policy>]) -> PolicyDecisionPoint {
        let retrieval =
            PolicyRetrievalPoint::with_policies(policies, self.config.matching_mode);
        PolicyDecisionPoint {
            config: self.config,
            retrieval,
            attributes: self.attributes,
            functions: self.functions,
        }
    }
}

/// Continuous stream of authorization decisions for one subscription.
///
/// Dropping the stream aborts the driving task, which tears down every
/// attribute subscription the evaluation opened.
#[derive(Debug)]
pub struct DecisionStream {
    rx: mpsc::UnboundedReceiver<AuthorizationDecision>,
    task: Option<JoinHandle<()>>,
}

impl Stream for DecisionStream {
    type Item = AuthorizationDecision;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for DecisionStream {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Drive one subscription: match, combine, emit, re-match on every index
/// snapshot swap, until the subscriber goes away.
async fn drive(
    ctx: EvaluationContext,
    mut snapshots: watch::Receiver<Arc<CanonicalIndexContainer>>,
    algorithm: CombiningAlgorithm,
    tx: mpsc::UnboundedSender<AuthorizationDecision>,
) {
    let mut last: Option<AuthorizationDecision> = None;
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        let result = snapshot.match_request(&ctx);
        debug!(
            matched = result.policies.len(),
            error = result.error_occurred,
            "matched candidate policies"
        );
        let mut decisions = combined_decisions(&result, &ctx, algorithm);

        loop {
            tokio::select! {
                changed = snapshots.changed() => match changed {
                    // A new snapshot: back to Matching.
                    Ok(()) => break,
                    // The retrieval point is gone; the current evaluation
                    // is the last one that can produce decisions.
                    Err(_) => {
                        while let Some(decision) = decisions.next().await {
                            if !emit(decision, &mut last, &tx) {
                                return;
                            }
                        }
                        return;
                    }
                },
                next = decisions.next() => match next {
                    Some(decision) => {
                        if !emit(decision, &mut last, &tx) {
                            return;
                        }
                    }
                    // Evaluation settled; only a snapshot swap can change
                    // the decision now.
                    None => {
                        if snapshots.changed().await.is_err() {
                            return;
                        }
                        break;
                    }
                },
            }
        }
    }
}

/// Send the decision unless it duplicates the previously emitted one.
/// False once the subscriber is gone.
fn emit(
    decision: AuthorizationDecision,
    last: &mut Option<AuthorizationDecision>,
    tx: &mpsc::UnboundedSender<AuthorizationDecision>,
) -> bool {
    if last.as_ref() == Some(&decision) {
        return true;
    }
    *last = Some(decision.clone());
    tx.send(decision).is_ok()
}

/// Recombined decision stream over the matched policies.
///
/// One contribution stream per matched policy, joined with latest-value
/// semantics; a match that saw a predicate failure contributes an extra
/// INDETERMINATE. An empty match emits one NOT_APPLICABLE immediately.
fn combined_decisions(
    result: &PolicyRetrievalResult,
    ctx: &EvaluationContext,
    algorithm: CombiningAlgorithm,
) -> BoxStream<'static, AuthorizationDecision> {
    let mut contributions: Vec<BoxStream<'static, AuthorizationDecision>> = result
        .policies
        .iter()
        .map(|policy| contribution(policy.clone(), ctx))
        .collect();
    if result.error_occurred {
        contributions.push(
            stream::once(future::ready(AuthorizationDecision::indeterminate())).boxed(),
        );
    }
    combine_latest_all(contributions)
        .map(move |decisions| algorithm.combine(&decisions))
        .boxed()
}

/// Live contribution of one matched policy: its body evaluation mapped to
/// decisions under the policy's entitlement and constraints.
fn contribution(
    policy: Arc<Policy>,
    ctx: &EvaluationContext,
) -> BoxStream<'static, AuthorizationDecision> {
    let scoped = ctx.with_imports(Arc::new(policy.imports.clone()));
    policy
        .body
        .evaluate(&scoped)
        .map(move |val| policy_decision(&policy, &val))
        .boxed()
}

/// A true body applies the policy's entitlement with its static
/// constraints, a false body does not apply, anything else is
/// INDETERMINATE.
fn policy_decision(policy: &Policy, val: &Val) -> AuthorizationDecision {
    match val {
        Val::Value(Json::Bool(true)) => AuthorizationDecision {
            decision: policy.entitlement.decision(),
            resource: policy.transformation.clone(),
            obligations: policy.obligations.clone(),
            advice: policy.advice.clone(),
        },
        Val::Value(Json::Bool(false)) => AuthorizationDecision::not_applicable(),
        _ => AuthorizationDecision::indeterminate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::InMemoryPolicySource;

    use std::time::Duration;

    use serde_json::json;
    use warden_core::Decision;
    use warden_lang::{
        Comparator, Entitlement, Expression, PublishedAttributeSource, StaticAttributeSource,
    };

    fn subscription() -> AuthorizationSubscription {
        AuthorizationSubscription::new("alice", "read", "report")
    }

    fn pdp_over(policies: Vec<Arc<Policy>>) -> PolicyDecisionPoint {
        PolicyDecisionPoint::builder().build_with_policies(&policies)
    }

    async fn next_decision(stream: &mut DecisionStream) -> AuthorizationDecision {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a decision")
            .expect("decision stream ended unexpectedly")
    }

    #[tokio::test]
    async fn test_empty_policy_set_is_immediately_not_applicable() {
        let pdp = pdp_over(Vec::new());
        let mut decisions = pdp.decide(subscription());
        assert_eq!(
            next_decision(&mut decisions).await,
            AuthorizationDecision::not_applicable()
        );
    }

    #[tokio::test]
    async fn test_applicable_policy_carries_constraints() {
        let policy = Arc::new(
            Policy::new("log-access", Entitlement::Permit)
                .with_obligation(json!({"type": "log"}))
                .with_advice(json!({"type": "notify"}))
                .with_transformation(json!({"redacted": true})),
        );
        let pdp = pdp_over(vec![policy]);
        let mut decisions = pdp.decide(subscription());

        let decision = next_decision(&mut decisions).await;
        assert_eq!(decision.decision, Decision::Permit);
        assert_eq!(decision.obligations, vec![json!({"type": "log"})]);
        assert_eq!(decision.advice, vec![json!({"type": "notify"})]);
        assert_eq!(decision.resource, Some(json!({"redacted": true})));
    }

    #[tokio::test]
    async fn test_deny_overrides_across_policies() {
        let pdp = pdp_over(vec![
            Arc::new(Policy::new("grant", Entitlement::Permit)),
            Arc::new(Policy::new("block", Entitlement::Deny)),
        ]);
        let mut decisions = pdp.decide(subscription());
        assert_eq!(next_decision(&mut decisions).await.decision, Decision::Deny);
    }

    #[tokio::test]
    async fn test_false_body_is_not_applicable() {
        let policy = Arc::new(
            Policy::new("gated", Entitlement::Permit).with_body(Expression::literal(false)),
        );
        let pdp = pdp_over(vec![policy]);
        let mut decisions = pdp.decide(subscription());
        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::NotApplicable
        );
    }

    #[tokio::test]
    async fn test_erroring_body_is_indeterminate() {
        let policy = Arc::new(Policy::new("broken", Entitlement::Permit).with_body(
            Expression::arithmetic(
                warden_lang::ArithmeticOp::Div,
                Expression::literal(json!(1)),
                Expression::literal(json!(0)),
            ),
        ));
        let pdp = pdp_over(vec![policy]);
        let mut decisions = pdp.decide(subscription());
        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::Indeterminate
        );
    }

    #[tokio::test]
    async fn test_match_error_folds_into_combine() {
        // The broken target fails during matching in best-effort mode; the
        // healthy policy still permits, but the retrieval error contributes
        // an INDETERMINATE which deny-overrides ranks above PERMIT.
        let pdp = pdp_over(vec![
            Arc::new(
                Policy::new("broken", Entitlement::Permit)
                    .with_target(Expression::literal(json!(42))),
            ),
            Arc::new(Policy::new("healthy", Entitlement::Permit)),
        ]);
        let mut decisions = pdp.decide(subscription());
        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::Indeterminate
        );
    }

    #[tokio::test]
    async fn test_attribute_updates_drive_new_decisions() {
        let source = Arc::new(PublishedAttributeSource::new(Val::of(json!(17))));
        let attributes = Arc::new(
            AttributeRegistry::new().with_source("subject.age", source.clone() as Arc<_>),
        );
        let policy = Arc::new(Policy::new("adults-only", Entitlement::Permit).with_body(
            Expression::compare(
                Comparator::Gt,
                Expression::attribute("subject.age", vec![]),
                Expression::literal(json!(18)),
            ),
        ));
        let pdp = PolicyDecisionPoint::builder()
            .with_attributes(attributes)
            .build_with_policies(&[policy]);
        let mut decisions = pdp.decide(subscription());

        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::NotApplicable
        );

        source.publish(Val::of(json!(21)));
        assert_eq!(next_decision(&mut decisions).await.decision, Decision::Permit);

        // Another permitted age recombines to the same decision, which is
        // suppressed; the next emission is the drop below the threshold.
        source.publish(Val::of(json!(22)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.publish(Val::of(json!(10)));
        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::NotApplicable
        );
    }

    #[tokio::test]
    async fn test_policy_set_swap_rematches() {
        let source = InMemoryPolicySource::new();
        let pdp = PolicyDecisionPoint::builder().build(&source);
        let mut decisions = pdp.decide(subscription());
        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::NotApplicable
        );

        source.publish(vec![Arc::new(Policy::new("late", Entitlement::Permit))]);
        assert_eq!(next_decision(&mut decisions).await.decision, Decision::Permit);
    }

    #[tokio::test]
    async fn test_dropping_the_stream_cancels_attribute_subscriptions() {
        let source = Arc::new(PublishedAttributeSource::new(Val::of_bool(true)));
        let attributes =
            Arc::new(AttributeRegistry::new().with_source("env.flag", source.clone() as Arc<_>));
        let policy = Arc::new(
            Policy::new("flagged", Entitlement::Permit)
                .with_body(Expression::attribute("env.flag", vec![])),
        );
        let pdp = PolicyDecisionPoint::builder()
            .with_attributes(attributes)
            .build_with_policies(&[policy]);

        let mut decisions = pdp.decide(subscription());
        assert_eq!(next_decision(&mut decisions).await.decision, Decision::Permit);
        assert_eq!(source.subscriber_count(), 1);

        drop(decisions);
        tokio::time::timeout(Duration::from_secs(5), async {
            while source.subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("attribute subscription not cancelled");
    }

    #[tokio::test]
    async fn test_liveness_settles_on_latest_value() {
        let source = Arc::new(PublishedAttributeSource::new(Val::of(json!(17))));
        let attributes = Arc::new(
            AttributeRegistry::new().with_source("subject.age", source.clone() as Arc<_>),
        );
        let policy = Arc::new(Policy::new("adults-only", Entitlement::Permit).with_body(
            Expression::compare(
                Comparator::Gt,
                Expression::attribute("subject.age", vec![]),
                Expression::literal(json!(18)),
            ),
        ));
        let pdp = PolicyDecisionPoint::builder()
            .with_attributes(attributes)
            .build_with_policies(&[policy]);
        let mut decisions = pdp.decide(subscription());

        // Each awaited decision reflects the then-latest attribute value.
        for (age, expected) in [(17, Decision::NotApplicable), (19, Decision::Permit),
                                (3, Decision::NotApplicable)] {
            source.publish(Val::of(json!(age)));
            assert_eq!(next_decision(&mut decisions).await.decision, expected);
        }
    }

    #[tokio::test]
    async fn test_config_variables_visible_to_targets() {
        let policy = Arc::new(Policy::new("tenant-gate", Entitlement::Permit).with_target(
            Expression::compare(
                Comparator::Eq,
                Expression::var("tenant"),
                Expression::literal("acme"),
            ),
        ));
        let config = PdpConfig::new().with_variable("tenant", json!("acme"));
        let pdp = PolicyDecisionPoint::builder()
            .with_config(config)
            .build_with_policies(&[policy]);
        let mut decisions = pdp.decide(subscription());
        assert_eq!(next_decision(&mut decisions).await.decision, Decision::Permit);
    }

    #[tokio::test]
    async fn test_reserved_config_variable_rejects_subscription() {
        let config = PdpConfig::new().with_variable("subject", json!("intruder"));
        let pdp = PolicyDecisionPoint::builder()
            .with_config(config)
            .build_with_policies(&[Arc::new(Policy::new("any", Entitlement::Permit))]);
        let mut decisions = pdp.decide(subscription());
        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::Indeterminate
        );
        assert_eq!(decisions.next().await, None);
    }

    #[tokio::test]
    async fn test_static_attribute_completes_but_decision_stays_live() {
        // A finite attribute stream settles the evaluation; the stream must
        // stay open and react to a later policy-set swap.
        let attributes = Arc::new(AttributeRegistry::new().with_source(
            "env.mode",
            Arc::new(StaticAttributeSource::new(Val::of("rw"))) as Arc<_>,
        ));
        let source = InMemoryPolicySource::with_policies(vec![Arc::new(
            Policy::new("mode-gate", Entitlement::Permit).with_body(Expression::compare(
                Comparator::Eq,
                Expression::attribute("env.mode", vec![]),
                Expression::literal("rw"),
            )),
        )]);
        let pdp = PolicyDecisionPoint::builder()
            .with_attributes(attributes)
            .build(&source);

        // Subscribe only after the initial compile landed, otherwise the
        // first observed snapshot is the empty placeholder.
        let mut snapshots = pdp.retrieval_point().subscribe();
        while snapshots.borrow_and_update().policies().is_empty() {
            snapshots.changed().await.unwrap();
        }

        let mut decisions = pdp.decide(subscription());
        assert_eq!(next_decision(&mut decisions).await.decision, Decision::Permit);

        source.publish(Vec::new());
        assert_eq!(
            next_decision(&mut decisions).await.decision,
            Decision::NotApplicable
        );
    }
}
