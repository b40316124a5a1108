//! Solver settings and their CBOR encoding.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::error::Error;
use crate::gmres::GMRESConfig;
use crate::linop::LinOpInfo;
use crate::mlmg::MLMGConfig;




/**
 * All the settings of a solve. Missing fields take their defaults, so a
 * file may name only what it changes.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub linop: LinOpInfo,
    pub mlmg: MLMGConfig,
    pub gmres: GMRESConfig,
}




pub fn to_writer<T: Serialize, W: Write>(value: &T, writer: W) -> Result<(), Error> {
    ciborium::ser::into_writer(value, writer).map_err(|e| Error::Config(format!("{:?}", e)))
}

pub fn from_reader<T: DeserializeOwned, R: Read>(reader: R) -> Result<T, Error> {
    ciborium::de::from_reader(reader).map_err(|e| Error::Config(format!("{:?}", e)))
}

pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::new();
    to_writer(value, &mut bytes)?;
    Ok(bytes)
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    from_reader(bytes)
}




// ============================================================================
impl SolverConfig {

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref()).map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        from_reader(BufReader::new(file))
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let file = File::create(path.as_ref()).map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let mut buffer = BufWriter::new(file);
        to_writer(self, &mut buffer)?;
        buffer.flush().map_err(|e| Error::Config(e.to_string()))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::linop::Smoother;
    use crate::mlmg::BottomSolver;
    use crate::multifab::RunOn;

    #[derive(Serialize)]
    struct Partial {
        mlmg: PartialMlmg,
    }

    #[derive(Serialize)]
    struct PartialMlmg {
        max_iters: usize,
        bottom_solver: BottomSolver,
    }

    #[test]
    fn settings_survive_a_cbor_round_trip() {
        let mut config = SolverConfig::default();
        config.linop.smoother = Smoother::Jacobi;
        config.linop.run_on = RunOn::Serial;
        config.mlmg.nu1 = 4;
        config.gmres.restart_length = 12;

        let bytes = to_bytes(&config).unwrap();
        assert_eq!(from_bytes::<SolverConfig>(&bytes).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let partial = Partial {
            mlmg: PartialMlmg { max_iters: 7, bottom_solver: BottomSolver::CG },
        };
        let config: SolverConfig = from_bytes(&to_bytes(&partial).unwrap()).unwrap();

        assert_eq!(config.mlmg.max_iters, 7);
        assert_eq!(config.mlmg.bottom_solver, BottomSolver::CG);
        assert_eq!(config.mlmg.nu2, MLMGConfig::default().nu2);
        assert_eq!(config.linop, LinOpInfo::default());
        assert_eq!(config.gmres, GMRESConfig::default());
    }

    #[test]
    fn garbage_is_a_config_error() {
        assert!(matches!(from_bytes::<SolverConfig>(&[0x6a, 0x61]), Err(Error::Config(_))));
    }

    #[test]
    fn files_round_trip() {
        let path = std::env::temp_dir().join(format!("gridiron-mlmg-config-{}.cbor", std::process::id()));
        let config = SolverConfig::default();
        config.store(&path).unwrap();
        assert_eq!(SolverConfig::load(&path).unwrap(), config);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(SolverConfig::load(&path), Err(Error::Config(_))));
    }
}
