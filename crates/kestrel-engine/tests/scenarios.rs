mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{
    buggy_program, counter_program, init_tracing, needs_lemma_program, EnumeratingFactory, FixedInterpolantFactory,
    RequiredSubsetFactory, SingleStateProgram, HEAD,
};
use kestrel_engine::abstraction::{AbstractionStrategy, PredicateAbstraction};
use kestrel_engine::candidate::SymbolicCandidate;
use kestrel_engine::induction::KInductionProver;
use kestrel_engine::invgen::{ConcurrentInvariantGenerator, DoNothingInvariantGenerator, InvariantSource, Refinement};
use kestrel_engine::lifting::LiftingStrategy;
use kestrel_engine::obligation::Obligation;
use kestrel_engine::options::HeadStartMode;
use kestrel_engine::pool::CandidatePool;
use kestrel_engine::unroller::Unroller;
use kestrel_engine::{AlgorithmStatus, BmcAlgorithm, BmcOptions, CandidateInvariant, EngineError};
use kestrel_smt::shutdown::ShutdownNotifier;
use kestrel_smt::terms::SmtTerm;

fn x_nonnegative() -> CandidateInvariant {
    CandidateInvariant::LocationFormula(SymbolicCandidate::at_loop_heads(
        SmtTerm::var("x").ge(SmtTerm::int(0)),
        [HEAD],
    ))
}

#[test]
fn safe_counter_is_proved_by_induction() {
    init_tracing();
    let program = counter_program();
    let mut reached = program.initial_reached();
    let pool = CandidatePool::new([x_nonnegative(), CandidateInvariant::TargetLocation]);
    let mut bmc = BmcAlgorithm::new(BmcOptions::default(), EnumeratingFactory::default(), program.clone(), pool)
        .with_step_case(program.step_case());

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::SOUND_AND_PRECISE);
    assert!(bmc.confirmed_candidates().contains(&x_nonnegative()));
    assert!(bmc.confirmed_candidates().contains(&CandidateInvariant::TargetLocation));
    assert!(bmc.counterexample().is_none());
    let stats = bmc.statistics();
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.induction_successes, 2);
    assert_eq!(stats.induction_failures, 0);
}

fn x_at_heads(formula: SmtTerm) -> SymbolicCandidate {
    SymbolicCandidate::at_loop_heads(formula, [HEAD])
}

/// `needs_lemma_program` over integers in `-3..=3`: the target is not
/// 1-inductive, but blocking the CTI `x = -3` is 2-inductive and closes it.
fn prove_target_through_obligation(options: BmcOptions) {
    init_tracing();
    let program = needs_lemma_program();
    let mut reached = program.initial_reached();
    let mut bmc = BmcAlgorithm::new(
        options,
        EnumeratingFactory::with_domain(-3..=3),
        program.clone(),
        CandidatePool::target_only(),
    )
    .with_step_case(program.step_case());

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::SOUND_AND_PRECISE);
    let confirmed = bmc.confirmed_candidates();
    let target_at = confirmed.iter().position(|c| c.is_target()).expect("target confirmed");
    let obligation_at = confirmed
        .iter()
        .position(|c| c.as_obligation().is_some())
        .expect("obligation confirmed");
    assert!(obligation_at < target_at);
    let stats = bmc.statistics();
    assert_eq!(stats.iterations, 2);
    assert_eq!(stats.ctis, 1);
    assert_eq!(stats.obligations_created, 1);
    assert_eq!(stats.obligations_confirmed, 1);
    assert!(bmc.pool().is_empty());
}

#[test]
fn obligation_from_lifted_cti_proves_the_target() {
    prove_target_through_obligation(BmcOptions::default());
}

#[test]
fn obligation_pipeline_with_property_directed_refinement() {
    prove_target_through_obligation(BmcOptions {
        property_directed: true,
        ..BmcOptions::default()
    });
}

#[test]
fn obligation_pipeline_without_lifting() {
    prove_target_through_obligation(BmcOptions {
        lifting: LiftingStrategy::None,
        ..BmcOptions::default()
    });
}

#[test]
fn exhausted_state_space_confirms_only_candidates_that_held() {
    init_tracing();
    let mut pool = CandidatePool::new([CandidateInvariant::TargetLocation, x_nonnegative()]);
    let weak = x_at_heads(SmtTerm::var("x").ge(SmtTerm::int(1)));
    assert!(pool.add_obligation(Obligation::new(
        CandidateInvariant::TargetLocation,
        x_at_heads(SmtTerm::var("x").ge(SmtTerm::int(5))),
        vec![weak.clone()],
    )));
    let options = BmcOptions {
        induction: false,
        ..BmcOptions::default()
    };
    let program = SingleStateProgram;
    let mut reached = program.initial_reached();
    let mut bmc = BmcAlgorithm::new(options, EnumeratingFactory::default(), program, pool);

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::SOUND_AND_PRECISE);
    assert_eq!(
        bmc.confirmed_candidates(),
        &[CandidateInvariant::TargetLocation, x_nonnegative()]
    );
    assert!(bmc
        .confirmed_candidates()
        .iter()
        .all(|c| c.symbolic() != Some(&weak)));
    let stats = bmc.statistics();
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.bounding_checks, 1);
    assert_eq!(stats.weakenings_used, 1);
    assert_eq!(stats.obligations_confirmed, 0);
    assert!(bmc.pool().is_empty());
}

#[test]
fn without_bounding_assertions_an_exhausted_space_proves_nothing() {
    let options = BmcOptions {
        induction: false,
        bounding_assertions: false,
        max_bound: Some(2),
        ..BmcOptions::default()
    };
    let program = SingleStateProgram;
    let mut reached = program.initial_reached();
    let pool = CandidatePool::new([CandidateInvariant::TargetLocation, x_nonnegative()]);
    let mut bmc = BmcAlgorithm::new(options, EnumeratingFactory::default(), program, pool);

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::UNSOUND_AND_PRECISE);
    assert!(bmc.confirmed_candidates().is_empty());
    assert_eq!(bmc.statistics().bounding_checks, 0);
    assert_eq!(bmc.pool().len(), 2);
}

#[test]
fn refuting_every_candidate_is_imprecise() {
    let program = counter_program();
    let mut reached = program.initial_reached();
    let pool = CandidatePool::new([CandidateInvariant::LocationFormula(x_at_heads(
        SmtTerm::var("x").lt(SmtTerm::int(0)),
    ))]);
    let options = BmcOptions {
        induction: false,
        ..BmcOptions::default()
    };
    let mut bmc = BmcAlgorithm::new(options, EnumeratingFactory::default(), program, pool);

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::UNSOUND_AND_IMPRECISE);
    assert!(bmc.confirmed_candidates().is_empty());
    assert_eq!(bmc.statistics().roots_refuted, 1);
    assert_eq!(bmc.statistics().iterations, 1);
}

#[test]
fn unexplained_violation_model_is_imprecise() {
    let program = buggy_program();
    let mut reached = program.initial_reached();
    // Every query is satisfiable and the model is empty, which puts x at 0
    // and so matches no target path.
    let factory = RequiredSubsetFactory {
        required: BTreeSet::from([SmtTerm::var("never_asserted")]),
        cores: false,
    };
    let options = BmcOptions {
        induction: false,
        ..BmcOptions::default()
    };
    let mut bmc = BmcAlgorithm::new(options, factory, program, CandidatePool::target_only());

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::UNSOUND_AND_IMPRECISE);
    assert!(bmc.counterexample().is_none());
    assert_eq!(bmc.statistics().bmc_checks, 1);
}

#[test]
fn proved_invariants_are_abstracted_into_new_candidates() {
    init_tracing();
    let program = counter_program();
    let mut reached = program.initial_reached();
    let factory = FixedInterpolantFactory {
        inner: EnumeratingFactory::default(),
        interpolant: SmtTerm::var("x@2").ge(SmtTerm::int(1)),
    };
    let abstraction = Arc::new(PredicateAbstraction::new());
    let options = BmcOptions {
        abstract_proved_invariants: true,
        ..BmcOptions::default()
    };
    let pool = CandidatePool::new([x_nonnegative(), CandidateInvariant::TargetLocation]);
    let mut bmc = BmcAlgorithm::new(options, factory, program.clone(), pool)
        .with_step_case(program.step_case())
        .with_abstraction(abstraction.clone());

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::SOUND_AND_PRECISE);
    let x_positive = SmtTerm::var("x").ge(SmtTerm::int(1));
    let abstracted = CandidateInvariant::LocationFormula(x_at_heads(x_positive.clone()));
    assert_eq!(bmc.statistics().abstracted_invariants, 1);
    assert!(bmc.pool().contains(&abstracted));
    assert!(!bmc.confirmed_candidates().contains(&abstracted));
    assert_eq!(abstraction.precision(HEAD), BTreeSet::from([x_positive]));
}

#[test]
fn reachable_error_yields_counterexample() {
    init_tracing();
    let program = buggy_program();
    let mut reached = program.initial_reached();
    let mut bmc = BmcAlgorithm::new(
        BmcOptions::default(),
        EnumeratingFactory::default(),
        program.clone(),
        CandidatePool::target_only(),
    )
    .with_step_case(program.step_case());

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::UNSOUND_AND_PRECISE);
    let cex = bmc.counterexample().expect("counterexample attached");
    assert_eq!(cex.loop_iterations(), 3);
    assert_eq!(cex.model().get_int("x@3"), Some(2));
    let target = reached.get(cex.target()).expect("target still reached");
    assert!(target.is_target);
    assert_eq!(bmc.statistics().iterations, 3);
    assert!(bmc.statistics().induction_failures >= 2);
}

#[test]
fn bound_schedule_exhaustion_is_unsound() {
    let program = buggy_program();
    let mut reached = program.initial_reached();
    let options = BmcOptions {
        induction: false,
        max_bound: Some(2),
        ..BmcOptions::default()
    };
    let mut bmc = BmcAlgorithm::new(
        options,
        EnumeratingFactory::default(),
        program,
        CandidatePool::target_only(),
    );

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::UNSOUND_AND_PRECISE);
    assert!(bmc.counterexample().is_none());
    assert_eq!(bmc.statistics().iterations, 2);
    assert_eq!(bmc.statistics().induction_checks, 0);
}

#[test]
fn missing_step_case_disables_induction() {
    let program = counter_program();
    let mut reached = program.initial_reached();
    let options = BmcOptions {
        max_bound: Some(2),
        ..BmcOptions::default()
    };
    let mut bmc = BmcAlgorithm::new(
        options,
        EnumeratingFactory::default(),
        program,
        CandidatePool::target_only(),
    );

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::UNSOUND_AND_PRECISE);
    assert_eq!(bmc.statistics().induction_checks, 0);
}

#[test]
fn requested_shutdown_interrupts_run() {
    let program = counter_program();
    let mut reached = program.initial_reached();
    let shutdown = ShutdownNotifier::new();
    shutdown.request("user abort");
    let mut bmc = BmcAlgorithm::new(
        BmcOptions::default(),
        EnumeratingFactory::default(),
        program.clone(),
        CandidatePool::target_only(),
    )
    .with_step_case(program.step_case())
    .with_shutdown(shutdown);

    let err = bmc.run(&mut reached).expect_err("run is interrupted");
    assert_eq!(err, EngineError::Interrupted("user abort".to_string()));
}

struct OneShot(Option<Refinement>);

impl InvariantSource for OneShot {
    fn refine(&mut self, _shutdown: &ShutdownNotifier) -> Result<Refinement, EngineError> {
        Ok(self.0.take().unwrap_or(Refinement::Exhausted))
    }
}

#[test]
fn external_invariants_close_the_induction_step() {
    init_tracing();
    let program = needs_lemma_program();
    let mut reached = program.initial_reached();
    let shutdown = ShutdownNotifier::new();
    let update = BTreeMap::from([(HEAD, SmtTerm::var("x").ge(SmtTerm::int(0)))]);
    let generator = ConcurrentInvariantGenerator::new(OneShot(Some(Refinement::Strengthened(update))), &shutdown);
    let options = BmcOptions {
        head_start: HeadStartMode::UntilExhausted,
        ..BmcOptions::default()
    };
    let mut bmc = BmcAlgorithm::new(
        options,
        EnumeratingFactory::default(),
        program.clone(),
        CandidatePool::target_only(),
    )
    .with_step_case(program.step_case())
    .with_invariant_generator(Box::new(generator))
    .with_shutdown(shutdown);

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::SOUND_AND_PRECISE);
    assert_eq!(bmc.statistics().induction_successes, 1);
    assert_eq!(bmc.statistics().induction_failures, 0);
}

/// Publishes `x >= 0`, reports a long run, then works until cancelled.
#[derive(Default)]
struct LongRunning {
    rounds: usize,
}

impl InvariantSource for LongRunning {
    fn refine(&mut self, shutdown: &ShutdownNotifier) -> Result<Refinement, EngineError> {
        self.rounds += 1;
        match self.rounds {
            1 => Ok(Refinement::Strengthened(BTreeMap::from([(
                HEAD,
                SmtTerm::var("x").ge(SmtTerm::int(0)),
            )]))),
            2 => Ok(Refinement::LikelyLongRunning),
            _ => {
                while !shutdown.is_requested() {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(EngineError::Interrupted("cancelled".to_string()))
            }
        }
    }
}

#[test]
fn head_start_ends_when_generator_is_likely_long_running() {
    init_tracing();
    let program = needs_lemma_program();
    let mut reached = program.initial_reached();
    let shutdown = ShutdownNotifier::new();
    let generator = ConcurrentInvariantGenerator::new(LongRunning::default(), &shutdown);
    let options = BmcOptions {
        head_start: HeadStartMode::UntilLikelyLongRunning,
        ..BmcOptions::default()
    };
    let mut bmc = BmcAlgorithm::new(
        options,
        EnumeratingFactory::default(),
        program.clone(),
        CandidatePool::target_only(),
    )
    .with_step_case(program.step_case())
    .with_invariant_generator(Box::new(generator))
    .with_shutdown(shutdown);

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::SOUND_AND_PRECISE);
    assert_eq!(bmc.statistics().induction_successes, 1);
    assert_eq!(bmc.statistics().induction_failures, 0);
}

#[test]
fn generator_proving_safety_ends_the_run() {
    let program = counter_program();
    let mut reached = program.initial_reached();
    let shutdown = ShutdownNotifier::new();
    let generator = ConcurrentInvariantGenerator::new(OneShot(Some(Refinement::ProgramSafe)), &shutdown);
    let options = BmcOptions {
        head_start: HeadStartMode::UntilExhausted,
        ..BmcOptions::default()
    };
    let mut bmc = BmcAlgorithm::new(options, EnumeratingFactory::default(), program, CandidatePool::target_only())
        .with_invariant_generator(Box::new(generator))
        .with_shutdown(shutdown);

    let status = bmc.run(&mut reached).expect("run succeeds");

    assert_eq!(status, AlgorithmStatus::SOUND_AND_PRECISE);
    assert_eq!(bmc.statistics().bmc_checks, 0);
    assert!(reached.targets().next().is_none());
}

#[test]
fn induction_check_keeps_stack_balanced() {
    let generator = DoNothingInvariantGenerator::default();
    let checked = BTreeSet::from([1]);

    let mut prover = KInductionProver::new(
        EnumeratingFactory::default(),
        counter_program().step_case(),
        &BmcOptions::default(),
        None,
        ShutdownNotifier::new(),
    )
    .expect("open prover");
    let proved = prover
        .check(&[x_nonnegative()], 1, &x_nonnegative(), &checked, &generator)
        .expect("check succeeds");
    assert!(proved.is_successful());
    assert_eq!(proved.invariant_refinement(), &None);
    assert_eq!(prover.prover_statistics().outstanding(), 0);

    let mut prover = KInductionProver::new(
        EnumeratingFactory::default(),
        buggy_program().step_case(),
        &BmcOptions::default(),
        None,
        ShutdownNotifier::new(),
    )
    .expect("open prover");
    let failed = prover
        .check(
            &[CandidateInvariant::TargetLocation],
            1,
            &CandidateInvariant::TargetLocation,
            &checked,
            &generator,
        )
        .expect("check succeeds");
    assert!(!failed.is_successful());
    assert_eq!(failed.k(), 1);
    let clauses = failed.bad_state_blocking_clauses();
    assert_eq!(clauses.len(), 1);
    let stats = prover.prover_statistics();
    assert!(stats.pushes > 0);
    assert_eq!(stats.pushes, stats.pops);
}

#[test]
fn interrupted_induction_check_keeps_stack_balanced() {
    let shutdown = ShutdownNotifier::new();
    let program = buggy_program();
    let mut prover = KInductionProver::new(
        EnumeratingFactory::interrupting_after(1, shutdown.clone()),
        program.step_case(),
        &BmcOptions::default(),
        None,
        shutdown,
    )
    .expect("open prover");

    let err = prover
        .check(
            &[CandidateInvariant::TargetLocation],
            1,
            &CandidateInvariant::TargetLocation,
            &BTreeSet::from([1]),
            &DoNothingInvariantGenerator::default(),
        )
        .expect_err("shutdown interrupts the check");

    assert!(err.is_interrupted());
    let stats = prover.prover_statistics();
    assert!(stats.pushes > 0);
    assert_eq!(stats.pushes, stats.pops);
}
