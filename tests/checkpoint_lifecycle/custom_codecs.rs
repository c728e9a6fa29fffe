//! User-supplied codecs plugged in through `DataStore`

use std::io::{Read, Write};
use std::sync::Arc;

use restartable::store::{read_len, read_u32, write_len, write_u32};
use restartable::{DataStore, Error, RestartError, StoreContext};

use crate::common::{object, registry, strict_engine};

/// Material state with a hand-written codec
#[derive(Debug, Default, Clone, PartialEq)]
struct Plasticity {
    yield_count: u32,
    strain: Vec<f64>,
}

impl DataStore for Plasticity {
    fn store(&self, w: &mut dyn Write) -> restartable::Result<()> {
        write_u32(w, self.yield_count)?;
        self.strain.store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> restartable::Result<()> {
        self.yield_count = read_u32(r, "yield count")?;
        self.strain.load(r)
    }
}

/// Nodal field whose length must match the mesh handed in as context
#[derive(Debug, Default)]
struct NodalField(Vec<f32>);

impl DataStore for NodalField {
    fn store(&self, w: &mut dyn Write) -> restartable::Result<()> {
        self.0.store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> restartable::Result<()> {
        self.0.load(r)
    }

    fn load_with_context(
        &mut self,
        r: &mut dyn Read,
        context: StoreContext<'_>,
    ) -> restartable::Result<()> {
        let n_nodes = context.and_then(|c| c.downcast_ref::<usize>()).copied();
        let len = read_len(r, "nodal field length")?;
        if let Some(n_nodes) = n_nodes {
            if len != n_nodes {
                return Err(Error::InvalidEncoding(format!(
                    "field has {} values but the mesh has {} nodes",
                    len, n_nodes
                )));
            }
        }
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            let mut v = 0f32;
            v.load(r)?;
            values.push(v);
        }
        self.0 = values;
        Ok(())
    }

    fn store_with_context(
        &self,
        w: &mut dyn Write,
        _context: StoreContext<'_>,
    ) -> restartable::Result<()> {
        write_len(w, self.0.len())?;
        for v in &self.0 {
            v.store(w)?;
        }
        Ok(())
    }
}

#[test]
fn hand_written_codec_survives_backup() {
    let mut io = strict_engine();
    let material = object("Materials", "j2", 0);
    let mut reg = registry(1);

    *material
        .declare_restartable_data(&mut reg, "state", Plasticity::default)
        .unwrap() = Plasticity {
        yield_count: 3,
        strain: vec![0.01, 0.02],
    };
    io.create_backup(&reg).unwrap();

    material
        .get_restartable_data_mut::<Plasticity>(&mut reg, "state")
        .unwrap()
        .strain
        .push(0.5);
    io.restore_backup(&mut reg, true).unwrap();

    assert_eq!(
        material
            .get_restartable_data::<Plasticity>(&reg, "state")
            .unwrap(),
        &Plasticity {
            yield_count: 3,
            strain: vec![0.01, 0.02],
        }
    );
}

#[test]
fn context_reaches_the_codec_on_restore() {
    let mut io = strict_engine();
    let aux = object("AuxVariables", "temperature", 0);

    let mut writing = registry(1);
    *aux
        .declare_restartable_data_with_context(
            &mut writing,
            "field",
            Arc::new(3usize),
            NodalField::default,
        )
        .unwrap() = NodalField(vec![1.0, 2.0, 3.0]);
    let backup = io.create_backup(&writing).unwrap();

    // Same mesh: loads
    let mut same = registry(1);
    aux.declare_restartable_data_with_context(
        &mut same,
        "field",
        Arc::new(3usize),
        NodalField::default,
    )
    .unwrap();
    io.restore_backup(&mut same, true).unwrap();
    assert_eq!(
        aux.get_restartable_data::<NodalField>(&same, "field").unwrap().0,
        vec![1.0, 2.0, 3.0]
    );

    // Refined mesh: the codec rejects the stored field
    let mut refined = registry(1);
    aux.declare_restartable_data_with_context(
        &mut refined,
        "field",
        Arc::new(5usize),
        NodalField::default,
    )
    .unwrap();
    let mut other = strict_engine();
    other.set_backup(backup);
    let err = other.restore_backup(&mut refined, true).unwrap_err();
    assert!(matches!(err, RestartError::Data(Error::InvalidEncoding(_))));
}

#[test]
fn changed_type_between_runs_is_rejected() {
    let mut io = strict_engine();
    let material = object("Materials", "j2", 0);

    let mut old_run = registry(1);
    material
        .declare_restartable_data(&mut old_run, "state", Plasticity::default)
        .unwrap();
    io.create_backup(&old_run).unwrap();

    let mut new_run = registry(1);
    material
        .declare_restartable_data(&mut new_run, "state", || vec![0.0f64])
        .unwrap();
    match io.restore_backup(&mut new_run, true) {
        Err(RestartError::TypeHashMismatch {
            name,
            stored_type,
            declared_type,
        }) => {
            assert_eq!(name, "Materials/j2/state");
            assert!(stored_type.ends_with("Plasticity"));
            assert!(declared_type.contains("Vec<f64>"));
        }
        other => panic!("expected a type hash mismatch, got {other:?}"),
    }
    assert_eq!(
        material
            .get_restartable_data::<Vec<f64>>(&new_run, "state")
            .unwrap(),
        &vec![0.0]
    );
}
