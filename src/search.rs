use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::circuit::{Circuit, Cplx, Element};
use crate::error::Error;
use crate::fitting::{self, Minimizer};

/// Source of candidate topologies for [`TopologySearch`].
///
/// The generation strategy lives behind this trait so it can evolve
/// independently of the search loop.
pub trait CircuitGenerator {
    /// Produce up to `popsize` candidates of at most `max_elements` elements
    /// each.
    fn generate(&mut self, popsize: usize, max_elements: usize) -> Vec<Circuit>;
}

/// Uniform random populations: every candidate is an independent random
/// series/parallel tree over the element set.
#[derive(Debug, Clone)]
pub struct RandomPopulation {
    rng: StdRng,
}

impl RandomPopulation {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Deterministic generator for reproducible searches.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    fn random_element(&mut self) -> Circuit {
        let element = match self.rng.gen_range(0..5) {
            0 => Element::Resistor,
            1 => Element::Capacitor,
            2 => Element::Cpe,
            3 => Element::Warburg,
            _ => Element::FiniteWarburg,
        };
        Circuit::Element(element)
    }

    fn random_tree(&mut self, elements: usize) -> Circuit {
        if elements <= 1 {
            return self.random_element();
        }
        let left = self.rng.gen_range(1..elements);
        let children = vec![self.random_tree(left), self.random_tree(elements - left)];
        if self.rng.gen_bool(0.5) {
            Circuit::Series(children)
        } else {
            Circuit::Parallel(children)
        }
    }
}

impl Default for RandomPopulation {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitGenerator for RandomPopulation {
    fn generate(&mut self, popsize: usize, max_elements: usize) -> Vec<Circuit> {
        (0..popsize)
            .map(|_| {
                let n = self.rng.gen_range(1..=max_elements.max(1));
                self.random_tree(n)
            })
            .collect()
    }
}

/// A candidate topology with its best-fit score from one generation.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub description: String,
    pub circuit: Circuit,
    pub parameters: Vec<f64>,
    /// Mean squared value of the final residual vector; lower is better
    pub score: f64,
}

/// Initial value assigned to every parameter of a candidate before fitting.
const FLAT_GUESS: f64 = 0.1;

/// Population-based search over circuit topologies for when the topology
/// itself is unknown.
///
/// Every generation is an independent sample from the generator; there is
/// deliberately no elitism or selection pressure between generations, so the
/// result is a best-of-population heuristic, not a converging optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologySearch {
    pub generations: usize,
    pub popsize: usize,
    pub max_elements: usize,
}

impl Default for TopologySearch {
    fn default() -> Self {
        Self { generations: 2, popsize: 30, max_elements: 5 }
    }
}

impl TopologySearch {
    /// Fit every candidate of every generation against the measured spectrum
    /// and return the scored batches, one per generation.
    ///
    /// A candidate whose fit fails is logged and skipped, so a batch may
    /// hold fewer than `popsize` entries.
    pub fn search(
        &self,
        frequencies: &[f64],
        impedance: &[Cplx],
        generator: &mut dyn CircuitGenerator,
        solver: &dyn Minimizer,
    ) -> Result<Vec<Vec<ScoredCandidate>>, Error> {
        fitting::check_spectrum(frequencies, impedance)?;

        let mut batches = Vec::with_capacity(self.generations);
        for generation in 0..self.generations {
            let population = generator.generate(self.popsize, self.max_elements);
            let mut scored = Vec::with_capacity(population.len());
            for circuit in population {
                let description = circuit.to_string();
                let guess = vec![FLAT_GUESS; circuit.parameter_count()];
                match fitting::circuit_fit(frequencies, impedance, &circuit, &guess, solver, None) {
                    Ok(outcome) => {
                        log::debug!(
                            "generation {generation}: {description} scored {:e}",
                            outcome.diagnostics.mean_square
                        );
                        scored.push(ScoredCandidate {
                            description,
                            circuit,
                            parameters: outcome.parameters,
                            score: outcome.diagnostics.mean_square,
                        });
                    }
                    Err(err) => {
                        log::debug!("generation {generation}: {description} failed to fit: {err}");
                    }
                }
            }
            batches.push(scored);
        }
        Ok(batches)
    }
}

/// The lowest-score candidate across all generations, if any fit succeeded.
pub fn best(batches: &[Vec<ScoredCandidate>]) -> Option<&ScoredCandidate> {
    batches
        .iter()
        .flatten()
        .min_by(|a, b| a.score.total_cmp(&b.score))
}

// ---------- Unit tests ----------
