//! Rank and thread agnostic data exported by one run and loaded by another

use std::collections::HashSet;

use restartable::{
    Bincode, DataIoConfig, RestartError, RestartableDataIo, RestartableDataWriter,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::common::{init_tracing, object, registry};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Surrogate {
    length_scales: Vec<f64>,
    noise: f64,
    labels: Vec<String>,
}

fn trained() -> Surrogate {
    Surrogate {
        length_scales: vec![0.3, 1.7],
        noise: 1e-4,
        labels: vec!["pressure".into(), "temperature".into()],
    }
}

#[test]
fn trained_model_loads_into_a_different_layout() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("surrogate.rd");
    let trainer = object("Trainer", "gp", 0).with_meta_data_map("model");

    // Training run: rank 1 of 4
    let mut training = registry(8);
    training.add_meta_data_map("model").unwrap();
    **trainer
        .declare_restartable_data(&mut training, "surrogate", || Bincode(Surrogate::default()))
        .unwrap() = trained();
    *trainer
        .declare_restartable_data(&mut training, "n_samples", || 0u64)
        .unwrap() = 250;
    RestartableDataWriter::new(DataIoConfig::parallel(1, 4))
        .write_file(&path, &[training.meta_data_map("model").unwrap()])
        .unwrap();

    // Using run: serial, two threads
    let mut using = registry(2);
    using.add_meta_data_map("model").unwrap();
    let user = object("Trainer", "gp", 1).with_meta_data_map("model");
    user.declare_restartable_data(&mut using, "surrogate", || Bincode(Surrogate::default()))
        .unwrap();
    user.declare_restartable_data(&mut using, "n_samples", || 0u64)
        .unwrap();

    let strict = RestartableDataIo::new(DataIoConfig::default()).unwrap();
    let err = strict
        .read_restartable_data(
            &path,
            &mut [using.meta_data_map_mut("model").unwrap()],
            &HashSet::new(),
        )
        .unwrap_err();
    assert!(matches!(err, RestartError::ProcessorMismatch { written: 4, current: 1 }));

    let agnostic = RestartableDataIo::new(DataIoConfig::layout_agnostic()).unwrap();
    let report = agnostic
        .read_restartable_data(
            &path,
            &mut [using.meta_data_map_mut("model").unwrap()],
            &HashSet::new(),
        )
        .unwrap();

    assert_eq!(report.loaded, 2);
    assert_eq!(
        user.get_restartable_data::<Bincode<Surrogate>>(&using, "surrogate")
            .unwrap()
            .0,
        trained()
    );
    assert_eq!(
        *user.get_restartable_data::<u64>(&using, "n_samples").unwrap(),
        250
    );
}

#[test]
fn exported_header_lists_contents_as_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("listing.rd");
    let trainer = object("Trainer", "gp", 0);

    let mut reg = registry(1);
    trainer
        .declare_restartable_data(&mut reg, "surrogate", || Bincode(trained()))
        .unwrap();
    trainer
        .declare_restartable_data(&mut reg, "converged", || true)
        .unwrap();
    let io = RestartableDataIo::new(DataIoConfig::default()).unwrap();
    io.write_restartable_data(&path, &[reg.thread_map(0).unwrap()])
        .unwrap();

    let header = io.read_header(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&header.to_json().unwrap()).unwrap();
    let entries = json["threads"][0]["entries"].as_array().unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "Trainer/gp/surrogate");
    assert_eq!(entries[1]["name"], "Trainer/gp/converged");
    assert_eq!(entries[1]["size"], 1);
    assert_eq!(json["preamble"]["n_procs"], 1);
}
