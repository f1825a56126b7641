//! The `Meta` operation (`spec.md` §4.D): folds one instruction into the
//! stage's in-memory runtime config object. Never touches the rootfs.

use ossb_image::{HealthCheck, RuntimeConfig};
use ossb_types::MetaInstruction;

/// Applies `instruction` to `config` in place. `Shell` has no field on
/// `RuntimeConfig` to land in — it only changes how a later `RUN`/`CMD`
/// is tokenized into argv, and that tokenization has already happened by
/// the time an `Exec`/`Meta` operation reaches this executor, so it is a
/// deliberate no-op here.
pub fn apply(config: &mut RuntimeConfig, instruction: &MetaInstruction) {
    match instruction {
        MetaInstruction::Env { key, value } => {
            let binding = format!("{key}={value}");
            let prefix = format!("{key}=");
            config.env.retain(|e| !e.starts_with(&prefix));
            config.env.push(binding);
        }
        MetaInstruction::Label { key, value } => {
            config.labels.insert(key.clone(), value.clone());
        }
        MetaInstruction::Expose { port } => {
            if !config.exposed_ports.contains(port) {
                config.exposed_ports.push(port.clone());
            }
        }
        MetaInstruction::User { user } => {
            config.user = Some(user.clone());
        }
        MetaInstruction::Workdir { path } => {
            config.workdir = Some(path.clone());
        }
        MetaInstruction::Cmd { argv } => {
            config.cmd = Some(argv.clone());
        }
        MetaInstruction::Entrypoint { argv } => {
            config.entrypoint = Some(argv.clone());
        }
        MetaInstruction::Volume { path } => {
            if !config.volumes.contains(path) {
                config.volumes.push(path.clone());
            }
        }
        MetaInstruction::StopSignal { signal } => {
            config.stop_signal = Some(signal.clone());
        }
        MetaInstruction::Healthcheck { cmd, interval, timeout, retries } => {
            config.healthcheck = Some(HealthCheck {
                test: cmd.clone(),
                interval: interval.clone(),
                timeout: timeout.clone(),
                retries: *retries,
            });
        }
        MetaInstruction::Shell { .. } => {}
    }
}
