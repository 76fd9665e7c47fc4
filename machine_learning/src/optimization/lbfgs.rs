use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use argmin::{
    core::{
        CostFunction, Error, Executor, Gradient, IterState, KV, Problem, Solver, State,
        TerminationReason, TerminationStatus,
    },
    solver::{linesearch::MoreThuenteLineSearch, quasinewton::LBFGS},
};
use log::debug;

use crate::{MlErr, Result};

type Params = Vec<f32>;
type LbfgsState = IterState<Params, Params, (), (), (), f32>;
type MoreThuenteLbfgs = LBFGS<MoreThuenteLineSearch<Params, Params, f32>, Params, Params, f32>;

const MAX_EVAL_REACHED: &str = "evaluation budget spent";

/// Why a call to `Lbfgs::minimize` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The gradient at the starting point was already below the tolerance.
    InitialGradient,
    /// The gradient norm or the change of the loss fell below its tolerance.
    Converged,
    MaxIter,
    MaxEval,
    /// argmin stopped for a reason no `Lbfgs` setting asks for.
    Interrupted,
}

impl From<&TerminationReason> for Termination {
    fn from(reason: &TerminationReason) -> Self {
        match reason {
            TerminationReason::SolverConverged => Termination::Converged,
            TerminationReason::MaxItersReached => Termination::MaxIter,
            TerminationReason::SolverExit(msg) if msg == MAX_EVAL_REACHED => Termination::MaxEval,
            _ => Termination::Interrupted,
        }
    }
}

/// The outcome of a call to `Lbfgs::minimize`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LbfgsSummary {
    /// The loss at the starting point.
    pub initial_loss: f32,
    /// The loss at the accepted final point.
    pub loss: f32,
    pub iterations: usize,
    /// The amount of times the objective was called.
    pub evaluations: usize,
    pub termination: Termination,
}

/// Limited memory BFGS with a More-Thuente line search, which enforces the strong Wolfe
/// conditions, both provided by argmin.
///
/// Unlike the optimizers implementing `Optimizer`, L-BFGS has to evaluate the objective several
/// times per step, so it drives the evaluation itself through `minimize`.
#[derive(Clone, Debug)]
pub struct Lbfgs {
    max_iter: usize,
    max_eval: usize,
    tolerance_grad: f32,
    tolerance_change: f32,
    history_size: usize,
}

impl Lbfgs {
    /// Creates a new `Lbfgs` with at most `max_iter * 5 / 4` evaluations and a history of 100
    /// corrections.
    ///
    /// # Arguments
    /// * `max_iter` - The maximum amount of iterations.
    ///
    /// # Returns
    /// A new `Lbfgs` instance.
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            max_eval: max_iter * 5 / 4,
            tolerance_grad: 1e-7,
            tolerance_change: 1e-9,
            history_size: 100,
        }
    }

    pub fn with_max_eval(mut self, max_eval: usize) -> Self {
        self.max_eval = max_eval;
        self
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size.max(1);
        self
    }

    /// Sets the first order optimality and the loss change tolerances.
    pub fn with_tolerances(mut self, tolerance_grad: f32, tolerance_change: f32) -> Self {
        self.tolerance_grad = tolerance_grad;
        self.tolerance_change = tolerance_change;
        self
    }

    /// Minimizes `objective` starting from `params`.
    ///
    /// # Arguments
    /// * `params` - The starting point, holds the accepted final point on return.
    /// * `state` - Caller owned state handed to every objective call.
    /// * `objective` - Computes the loss at the given parameters and writes its gradient into
    ///   the given buffer. It's called once per distinct point the solver visits, most of them
    ///   by the line search.
    ///
    /// # Returns
    /// A summary of the run, or the first error returned by `objective`.
    pub fn minimize<S, F>(
        &self,
        params: &mut [f32],
        state: &mut S,
        mut objective: F,
    ) -> Result<LbfgsSummary>
    where
        F: FnMut(&mut S, &[f32], &mut [f32]) -> Result<f32>,
    {
        let mut grad = vec![0.; params.len()];
        let initial_loss = objective(&mut *state, params, &mut grad)?;

        let stop = |termination| LbfgsSummary {
            initial_loss,
            loss: initial_loss,
            iterations: 0,
            evaluations: 1,
            termination,
        };

        if grad.iter().all(|g| g.abs() <= self.tolerance_grad) {
            return Ok(stop(Termination::InitialGradient));
        }

        if self.max_iter == 0 {
            return Ok(stop(Termination::MaxIter));
        }

        let evaluations = Rc::new(Cell::new(1));
        let start = params.to_vec();
        let problem = Objective {
            inner: RefCell::new((state, objective)),
            last: RefCell::new(Some(Evaluation {
                params: start.clone(),
                loss: initial_loss,
                grad: grad.clone(),
            })),
            evaluations: Rc::clone(&evaluations),
        };
        let solver = Budgeted {
            solver: self.solver()?,
            evaluations: Rc::clone(&evaluations),
            max_eval: self.max_eval,
        };

        let max_iters = self.max_iter as u64;
        let res = Executor::new(problem, solver)
            .configure(|s| {
                s.param(start)
                    .gradient(grad)
                    .cost(initial_loss)
                    .max_iters(max_iters)
            })
            .run()
            .map_err(from_argmin)?;

        let end = res.state();
        if let Some(x) = end.get_param() {
            params.copy_from_slice(x);
        }

        Ok(LbfgsSummary {
            initial_loss,
            loss: end.get_cost(),
            iterations: end.get_iter() as usize,
            evaluations: evaluations.get(),
            termination: end
                .get_termination_reason()
                .map_or(Termination::Interrupted, Termination::from),
        })
    }

    fn solver(&self) -> Result<MoreThuenteLbfgs> {
        LBFGS::new(MoreThuenteLineSearch::new(), self.history_size)
            .with_tolerance_grad(self.tolerance_grad)
            .and_then(|lbfgs| lbfgs.with_tolerance_cost(self.tolerance_change))
            .map_err(from_argmin)
    }
}

/// Objective errors travel through argmin untouched, anything else comes from the solver.
fn from_argmin(err: Error) -> MlErr {
    err.downcast::<MlErr>()
        .unwrap_or_else(|err| MlErr::Solver(err.to_string()))
}

struct Evaluation {
    params: Params,
    loss: f32,
    grad: Params,
}

/// The caller's objective and state seen as an argmin problem.
///
/// argmin asks for the cost and the gradient of a point separately, the last evaluation is kept
/// so both are answered by a single call to the objective.
struct Objective<'s, S, F> {
    inner: RefCell<(&'s mut S, F)>,
    last: RefCell<Option<Evaluation>>,
    evaluations: Rc<Cell<usize>>,
}

impl<S, F> Objective<'_, S, F>
where
    F: FnMut(&mut S, &[f32], &mut [f32]) -> Result<f32>,
{
    fn evaluate<T>(&self, params: &Params, read: impl FnOnce(&Evaluation) -> T) -> Result<T> {
        let mut last = self.last.borrow_mut();
        if let Some(eval) = last.as_ref().filter(|eval| eval.params == *params) {
            return Ok(read(eval));
        }

        let mut grad = vec![0.; params.len()];
        let mut inner = self.inner.borrow_mut();
        let (state, objective) = &mut *inner;
        let loss = objective(&mut **state, params, &mut grad)?;
        self.evaluations.set(self.evaluations.get() + 1);

        let eval = last.insert(Evaluation {
            params: params.clone(),
            loss,
            grad,
        });
        Ok(read(eval))
    }
}

impl<S, F> CostFunction for Objective<'_, S, F>
where
    F: FnMut(&mut S, &[f32], &mut [f32]) -> Result<f32>,
{
    type Param = Params;
    type Output = f32;

    fn cost(&self, params: &Params) -> std::result::Result<f32, Error> {
        Ok(self.evaluate(params, |eval| eval.loss)?)
    }
}

impl<S, F> Gradient for Objective<'_, S, F>
where
    F: FnMut(&mut S, &[f32], &mut [f32]) -> Result<f32>,
{
    type Param = Params;
    type Gradient = Params;

    fn gradient(&self, params: &Params) -> std::result::Result<Params, Error> {
        Ok(self.evaluate(params, |eval| eval.grad.clone())?)
    }
}

/// argmin's L-BFGS, stopped after the first iteration that leaves the objective evaluated
/// `max_eval` times or more.
#[derive(Clone)]
struct Budgeted {
    solver: MoreThuenteLbfgs,
    evaluations: Rc<Cell<usize>>,
    max_eval: usize,
}

impl<O> Solver<O, LbfgsState> for Budgeted
where
    O: CostFunction<Param = Params, Output = f32> + Gradient<Param = Params, Gradient = Params>,
{
    const NAME: &'static str = "L-BFGS";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: LbfgsState,
    ) -> std::result::Result<(LbfgsState, Option<KV>), Error> {
        self.solver.init(problem, state)
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: LbfgsState,
    ) -> std::result::Result<(LbfgsState, Option<KV>), Error> {
        let (state, kv) = self.solver.next_iter(problem, state)?;
        debug!(
            iteration = state.get_iter() + 1,
            loss = state.get_cost(),
            evaluations = self.evaluations.get();
            "l-bfgs step"
        );
        Ok((state, kv))
    }

    fn terminate(&mut self, state: &LbfgsState) -> TerminationStatus {
        let status = Solver::<O, LbfgsState>::terminate(&mut self.solver, state);
        if status.terminated() || state.get_iter() == 0 || self.evaluations.get() < self.max_eval {
            return status;
        }

        TerminationStatus::Terminated(TerminationReason::SolverExit(MAX_EVAL_REACHED.into()))
    }
}
