//! Historian-format model files.
//!
//! The on-disk form is JSON with an `alphabet` string, substitution rates
//! as nested per-symbol maps, and the four indel parameters as optional
//! top-level keys defaulting to zero. A single component lives at the top
//! level under `subrate`/`rootprob`; several components live in a `mixture`
//! array. Absent map entries read as zero, rates are forced into rate-matrix
//! form and the root distribution is rescaled to sum to one, so hand-edited
//! files do not need to be exactly normalized.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{CanopyError, Result};
use crate::io::open_reader;
use crate::matrix::Matrix;
use crate::model::{
    normalize_distribution, normalize_rate_matrix, Alphabet, IndelParams, Model,
    MixtureComponent,
};

type RateTable = BTreeMap<String, BTreeMap<String, f64>>;
type ProbTable = BTreeMap<String, f64>;

#[derive(Debug, Serialize, Deserialize)]
struct ComponentRepr {
    subrate: RateTable,
    rootprob: ProbTable,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelRepr {
    alphabet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mixture: Option<Vec<ComponentRepr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subrate: Option<RateTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rootprob: Option<ProbTable>,
    #[serde(default)]
    insrate: f64,
    #[serde(default)]
    delrate: f64,
    #[serde(default)]
    insextprob: f64,
    #[serde(default)]
    delextprob: f64,
}

/// Read a model from a (possibly gzipped) historian JSON file.
pub fn read_model(path: impl AsRef<Path>) -> Result<Model> {
    parse_model(open_reader(path)?)
}

pub fn parse_model(reader: impl Read) -> Result<Model> {
    let repr: ModelRepr = serde_json::from_reader(reader)?;
    let alphabet = Alphabet::new(&repr.alphabet)?;

    let mixture = match (&repr.mixture, &repr.subrate) {
        (Some(components), _) => components
            .iter()
            .map(|c| component_from_tables(&alphabet, &c.subrate, &c.rootprob))
            .collect::<Result<Vec<_>>>()?,
        (None, Some(subrate)) => {
            let rootprob = repr.rootprob.as_ref().ok_or_else(|| {
                CanopyError::ModelFormat("model is missing 'rootprob'".to_string())
            })?;
            vec![component_from_tables(&alphabet, subrate, rootprob)?]
        }
        (None, None) => {
            return Err(CanopyError::ModelFormat(
                "model has neither 'mixture' nor 'subrate'".to_string(),
            ))
        }
    };

    let indel = IndelParams {
        ins_rate: repr.insrate,
        del_rate: repr.delrate,
        ins_ext_prob: repr.insextprob,
        del_ext_prob: repr.delextprob,
    };
    Model::new(alphabet, mixture, indel)
}

/// Write a model as historian JSON. Single-component models keep their
/// tables at the top level; anything else goes into a `mixture` array.
pub fn write_model(model: &Model, mut output: impl Write) -> Result<()> {
    let mut repr = ModelRepr {
        alphabet: model.alphabet.to_symbol_string(),
        mixture: None,
        subrate: None,
        rootprob: None,
        insrate: model.indel.ins_rate,
        delrate: model.indel.del_rate,
        insextprob: model.indel.ins_ext_prob,
        delextprob: model.indel.del_ext_prob,
    };
    match model.mixture.as_slice() {
        [single] => {
            let tables = component_tables(&model.alphabet, single);
            repr.subrate = Some(tables.subrate);
            repr.rootprob = Some(tables.rootprob);
        }
        components => {
            repr.mixture = Some(
                components
                    .iter()
                    .map(|c| component_tables(&model.alphabet, c))
                    .collect(),
            );
        }
    }

    serde_json::to_writer_pretty(&mut output, &repr)?;
    writeln!(output)?;
    Ok(())
}

fn component_from_tables(
    alphabet: &Alphabet,
    subrate: &RateTable,
    rootprob: &ProbTable,
) -> Result<MixtureComponent> {
    let n = alphabet.len();

    let mut raw = Matrix::zeros(n);
    for (from, row) in subrate {
        let i = symbol_token(alphabet, from)?;
        for (to, &rate) in row {
            let j = symbol_token(alphabet, to)?;
            raw.set(i, j, rate);
        }
    }

    let weights: Vec<f64> = (0..n)
        .map(|t| {
            rootprob
                .get(&alphabet.symbol(t).to_string())
                .copied()
                .unwrap_or(0.0)
        })
        .collect();

    Ok(MixtureComponent {
        sub_rate: normalize_rate_matrix(&raw),
        root_prob: normalize_distribution(&weights)?,
    })
}

fn component_tables(alphabet: &Alphabet, component: &MixtureComponent) -> ComponentRepr {
    let n = alphabet.len();
    let mut subrate = RateTable::new();
    for i in 0..n {
        let mut row = BTreeMap::new();
        for j in 0..n {
            if i != j {
                row.insert(alphabet.symbol(j).to_string(), component.sub_rate.get(i, j));
            }
        }
        subrate.insert(alphabet.symbol(i).to_string(), row);
    }
    let rootprob = (0..n)
        .map(|i| (alphabet.symbol(i).to_string(), component.root_prob[i]))
        .collect();
    ComponentRepr { subrate, rootprob }
}

fn symbol_token(alphabet: &Alphabet, key: &str) -> Result<usize> {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => alphabet.token(c).ok_or_else(|| {
            CanopyError::ModelFormat(format!("symbol {key:?} is not in the alphabet"))
        }),
        _ => Err(CanopyError::ModelFormat(format!(
            "symbol key {key:?} is not a single character"
        ))),
    }
}
