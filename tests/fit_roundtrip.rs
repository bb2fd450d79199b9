use eisfit::fitting::geomspace;
use eisfit::{CircuitModel, Circuit, Cplx, LeastSq, RandomPopulation, TopologySearch};

fn synthetic(description: &str, params: &[f64], freqs: &[f64]) -> Vec<Cplx> {
    let circuit: Circuit = description.parse().unwrap();
    circuit.simulate(params, freqs).unwrap()
}

#[test]
fn randles_roundtrip() {
    let truth = [15.0, 100.0, 2e-5, 150.0, 0.5];
    let freqs: Vec<f64> = geomspace(0.1, 1e5, 40).collect();
    let measured = synthetic("R_0-p(R_1,C_1)-W_1/W_2", &truth, &freqs);

    // a guess in the neighborhood of the truth must recover it on
    // noiseless data
    let guess = vec![18.0, 80.0, 3e-5, 120.0, 0.6];
    let mut model = CircuitModel::randles(Some(guess), false).unwrap();
    model.fit(&freqs, &measured).unwrap();

    let fitted = model.parameters().unwrap();
    for (fitted, expected) in fitted.iter().zip(&truth) {
        assert!(
            ((fitted - expected) / expected).abs() < 1e-3,
            "{fitted} vs {expected}"
        );
    }

    // fit-then-predict reproduces the measured spectrum
    let predicted = model.predict(&freqs).unwrap();
    for (p, m) in predicted.iter().zip(&measured) {
        assert!((p - m).norm() < 1e-5 * m.norm().max(1.0));
    }
}

#[test]
fn bounded_roundtrip() {
    let truth = [10.0, 100.0, 1e-5];
    let freqs: Vec<f64> = geomspace(1.0, 1e5, 30).collect();
    let measured = synthetic("R_0-p(R_1,C_1)", &truth, &freqs);

    let mut model = CircuitModel::new("R_0-p(R_1,C_1)", Some(vec![8.0, 120.0, 2e-5]))
        .unwrap()
        .with_bounds(vec![(0.0, f64::INFINITY); 3])
        .unwrap();

    let predicted = model.fit(&freqs, &measured).unwrap().predict(&freqs).unwrap();

    let fitted = model.parameters().unwrap();
    for (fitted, expected) in fitted.iter().zip(&truth) {
        assert!(
            ((fitted - expected) / expected).abs() < 1e-3,
            "{fitted} vs {expected}"
        );
    }
    for (p, m) in predicted.iter().zip(&measured) {
        assert!((p - m).norm() < 1e-5 * m.norm().max(1.0));
    }

    let diag = model.diagnostics().unwrap();
    assert_eq!(diag.residuals.len(), 2 * freqs.len());
    assert!(diag.mean_square < 1e-8);
}

#[test]
fn search_smoke() {
    let freqs: Vec<f64> = geomspace(1.0, 1e3, 12).collect();
    let measured = synthetic("R_0", &[0.5], &freqs);

    let search = TopologySearch { generations: 2, popsize: 4, max_elements: 3 };
    let mut generator = RandomPopulation::with_seed(11);
    let solver = LeastSq { patience: 300, ..LeastSq::default() };
    let batches = search.search(&freqs, &measured, &mut generator, &solver).unwrap();

    assert_eq!(batches.len(), 2);
    for batch in &batches {
        assert!(batch.len() <= 4);
        for candidate in batch {
            assert_eq!(candidate.parameters.len(), candidate.circuit.parameter_count());
            assert!(candidate.score.is_finite());
        }
    }
}
