//! Close / replace / hold policy and the optimization tick.

use super::allocator::{admit, Adjustments, AdmissionOutcome};
use super::pnl::PnlTracker;
use crate::broker::Broker;
use crate::config::PortfolioConfig;
use crate::error::PortfolioError;
use crate::persistence::{AdjustmentReason, SignalLog};
use crate::portfolio::{FollowedPool, Portfolio};
use crate::signal::{PairKey, Signal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What to do with a followed pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceAction {
    /// Keep the position unchanged
    Hold,
    /// Remaining edge is gone; flatten both legs and free the slot
    Close,
    /// Flatten both legs and hand the slot to the best ignored signal
    Replace,
}

/// Thresholds for the close / replace decision.
#[derive(Debug, Clone, Copy)]
pub struct ReplacementPolicy {
    /// Remaining potential above `divergence_factor * expected_return` means the
    /// spread has moved beyond the modeled relationship
    pub divergence_factor: Decimal,
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        Self {
            divergence_factor: dec!(1.5),
        }
    }
}

impl ReplacementPolicy {
    /// Decide the action for one pair.
    ///
    /// `best_candidate` is the expected return of the top ignored signal. With
    /// no candidate a pair can still close but is never replaced.
    pub fn decide(
        &self,
        expected_return: Decimal,
        expected_potential: Decimal,
        best_candidate: Option<Decimal>,
    ) -> RebalanceAction {
        if expected_potential <= Decimal::ZERO {
            return RebalanceAction::Close;
        }

        let Some(best) = best_candidate else {
            return RebalanceAction::Hold;
        };

        let outranked = expected_potential < best;
        let diverged = expected_potential > expected_return * self.divergence_factor;
        if outranked || diverged {
            RebalanceAction::Replace
        } else {
            RebalanceAction::Hold
        }
    }
}

/// Evaluation of one followed pair during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PairDecision {
    pub pair: PairKey,
    pub expected_return: Decimal,
    pub current_pnl: Decimal,
    pub expected_potential: Decimal,
    pub action: RebalanceAction,
    /// Ignored pair promoted into the freed slot
    pub replacement: Option<PairKey>,
}

/// Outcome of an intake call or optimization tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Target share count per ticker; newer targets win
    pub adjustments: Adjustments,
    pub decisions: Vec<PairDecision>,
    pub admitted: Vec<PairKey>,
    pub ignored: Vec<PairKey>,
    /// Set when the state was committed but the signal log could not be written
    pub persist_error: Option<PortfolioError>,
}

impl TickReport {
    pub fn is_noop(&self) -> bool {
        self.adjustments.is_empty() && self.decisions.is_empty()
    }

    pub fn count(&self, action: RebalanceAction) -> usize {
        self.decisions.iter().filter(|d| d.action == action).count()
    }
}

/// Runs signal intake and optimization ticks against a portfolio.
///
/// Both entry points take `&mut Portfolio`, so only one call can touch a
/// portfolio at a time. Each call works on a draft and commits it only after
/// every broker query and sizing step succeeded.
pub struct RebalanceEngine<B: Broker> {
    broker: Arc<B>,
    pnl: PnlTracker,
    policy: ReplacementPolicy,
    log: Option<SignalLog>,
}

impl<B: Broker> RebalanceEngine<B> {
    pub fn new(broker: Arc<B>, config: &PortfolioConfig) -> Self {
        Self {
            broker,
            pnl: PnlTracker::new(config.price_source),
            policy: ReplacementPolicy {
                divergence_factor: config.divergence_factor,
            },
            log: None,
        }
    }

    /// Persist the followed pool after every successful call.
    pub fn with_log(mut self, log: SignalLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn log(&self) -> Option<&SignalLog> {
        self.log.as_ref()
    }

    /// Admit a fresh batch of signals from pair discovery.
    #[instrument(skip_all, fields(account = %portfolio.account(), signals = signals.len()))]
    pub fn intake(
        &self,
        portfolio: &mut Portfolio,
        signals: Vec<Signal>,
    ) -> Result<TickReport, PortfolioError> {
        if signals.is_empty() {
            return Ok(TickReport::default());
        }

        let mut draft = portfolio.clone();
        let outcome = admit(signals, &mut draft)?;
        *portfolio = draft;

        info!(
            admitted = outcome.admitted.len(),
            ignored = outcome.ignored.len(),
            refreshed = outcome.refreshed.len(),
            empty_slots = portfolio.empty_slots(),
            "Signal intake complete"
        );

        Ok(TickReport {
            persist_error: self.persist(portfolio, &[], &outcome),
            adjustments: outcome.adjustments,
            decisions: Vec::new(),
            admitted: outcome.admitted,
            ignored: outcome.ignored,
        })
    }

    /// Run one optimization pass over the followed pairs.
    #[instrument(skip_all, fields(account = %portfolio.account()))]
    pub async fn optimize(&self, portfolio: &mut Portfolio) -> Result<TickReport, PortfolioError> {
        let positions = self
            .broker
            .positions(portfolio.account())
            .await
            .map_err(PortfolioError::CollaboratorUnavailable)?;

        if positions.is_empty() {
            debug!("No open positions, nothing to optimize");
            return Ok(TickReport::default());
        }

        // Commit happens at the end; any error drops the draft
        let mut draft = portfolio.clone();
        draft.sync_broker_positions(&positions);
        draft.clear_pnl();
        self.pnl
            .evaluate(self.broker.as_ref(), &mut draft, &positions)
            .await?;

        let mut candidates: VecDeque<Signal> = draft.ignored().ranked().into();
        let mut adjustments = Adjustments::new();
        let mut decisions = Vec::new();
        let mut to_promote = Vec::new();

        let held: Vec<(PairKey, Decimal)> = draft
            .followed()
            .records()
            .into_iter()
            .map(|r| (r.pair().clone(), r.signal.expected_return()))
            .collect();

        for (pair, expected_return) in held {
            let (Some(pnl_a), Some(pnl_b)) = (
                draft.position_pnl(pair.ticker_a()),
                draft.position_pnl(pair.ticker_b()),
            ) else {
                warn!(%pair, "Missing PnL for a leg, holding");
                continue;
            };

            let current_pnl = pnl_a + pnl_b;
            let expected_potential = expected_return - current_pnl;
            let eligible = eligible_candidate(&candidates, draft.followed(), &pair, &to_promote);
            let best = eligible.map(|i| candidates[i].expected_return());
            let action = self.policy.decide(expected_return, expected_potential, best);

            let mut replacement = None;
            match action {
                RebalanceAction::Hold => {}
                RebalanceAction::Close | RebalanceAction::Replace => {
                    for ticker in pair.tickers() {
                        adjustments.insert(ticker.to_string(), 0);
                    }
                    draft.followed_mut().remove(&pair);

                    if action == RebalanceAction::Replace {
                        if let Some(next) = eligible.and_then(|i| candidates.remove(i)) {
                            draft.ignored_mut().remove(next.pair());
                            replacement = Some(next.pair().clone());
                            to_promote.push(next);
                        }
                    }
                }
            }

            debug!(
                %pair,
                %expected_return,
                %current_pnl,
                %expected_potential,
                ?action,
                "Evaluated pair"
            );

            decisions.push(PairDecision {
                pair,
                expected_return,
                current_pnl,
                expected_potential,
                action,
                replacement,
            });
        }

        let outcome = admit(to_promote, &mut draft)?;
        adjustments.extend(outcome.adjustments.iter().map(|(t, s)| (t.clone(), *s)));

        *portfolio = draft;

        let report = TickReport {
            persist_error: self.persist(portfolio, &decisions, &outcome),
            adjustments,
            decisions,
            admitted: outcome.admitted,
            ignored: outcome.ignored,
        };

        info!(
            positions = positions.len(),
            closed = report.count(RebalanceAction::Close),
            replaced = report.count(RebalanceAction::Replace),
            held = report.count(RebalanceAction::Hold),
            promoted = report.admitted.len(),
            empty_slots = portfolio.empty_slots(),
            "Optimization tick complete"
        );

        Ok(report)
    }

    fn persist(
        &self,
        portfolio: &Portfolio,
        decisions: &[PairDecision],
        outcome: &AdmissionOutcome,
    ) -> Option<PortfolioError> {
        let log = self.log.as_ref()?;

        let mut history = Vec::new();
        for decision in decisions {
            let reason = match decision.action {
                RebalanceAction::Hold => continue,
                RebalanceAction::Close => AdjustmentReason::Close,
                RebalanceAction::Replace => AdjustmentReason::Replace,
            };
            for ticker in decision.pair.tickers() {
                history.push((ticker.to_string(), 0, reason));
            }
        }
        for (ticker, shares) in &outcome.adjustments {
            let reason = if outcome.refreshed.iter().any(|p| p.contains(ticker)) {
                AdjustmentReason::Refresh
            } else {
                AdjustmentReason::Open
            };
            history.push((ticker.clone(), *shares, reason));
        }

        let result = log
            .save_followed(portfolio.followed())
            .and_then(|()| log.record_adjustments(&history));

        match result {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "Failed to persist followed signals");
                Some(PortfolioError::Persistence(e))
            }
        }
    }
}

/// Index of the best ranked candidate that can take the slot of `replacing`.
///
/// A candidate is skipped when one of its tickers is held by a pair other than
/// `replacing`, or is already claimed by a signal promoted earlier this tick.
/// Admission would route either back to the ignored pool and leave the slot empty.
fn eligible_candidate(
    candidates: &VecDeque<Signal>,
    followed: &FollowedPool,
    replacing: &PairKey,
    promoting: &[Signal],
) -> Option<usize> {
    candidates.iter().position(|candidate| {
        candidate.pair().tickers().into_iter().all(|ticker| {
            let free_in_pool = followed
                .by_ticker(ticker)
                .map_or(true, |holder| holder.pair() == replacing);
            free_in_pool && !promoting.iter().any(|p| p.pair().contains(ticker))
        })
    })
}
