//! `--gpus` support via an NVIDIA container toolkit hook.

use std::env;
use std::path::PathBuf;

use oci_spec::runtime::{HookBuilder, HooksBuilder, Spec};

use crate::error::{Result, StevedoreError};
use crate::options::ContainerOptions;
use crate::spec::SpecMutator;

const NVIDIA_CLI: &str = "nvidia-container-cli";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuSpec {
    /// Device indexes or UUIDs; empty means all devices.
    pub devices: Vec<String>,
    /// Driver capabilities; defaults to utility and compute.
    pub capabilities: Vec<String>,
    /// Requested driver; only the NVIDIA toolkit is wired up.
    pub driver: Option<String>,
}

/// Which list a bare CSV token continues.
enum ListField {
    Device,
    Capabilities,
}

/// Parses one `--gpus` flag: `all`, a bare count (`-1` = all), or a CSV
/// of `driver=`, `count=`, `device=` and `capabilities=` fields. Fields
/// may be double-quoted to protect embedded commas, and a bare token
/// continues the preceding `device`/`capabilities` list, so
/// `"device=GPU-abc,capabilities=utility,compute"` yields one device and
/// two capabilities.
pub fn parse_gpus(flag: &str) -> Result<GpuSpec> {
    let mut spec = GpuSpec::default();
    if flag == "all" {
        return Ok(spec);
    }
    if let Ok(count) = flag.parse::<i64>() {
        if count < -1 || count == 0 {
            return Err(StevedoreError::InvalidInput(format!(
                "invalid gpu count: {count}"
            )));
        }
        if count > 0 {
            spec.devices = (0..count).map(|i| i.to_string()).collect();
        }
        return Ok(spec);
    }

    let unquoted = flag.replace('"', "");
    let mut last: Option<ListField> = None;
    for token in unquoted.split(',') {
        match token.split_once('=') {
            Some(("device", value)) => {
                spec.devices.push(value.to_string());
                last = Some(ListField::Device);
            }
            Some(("capabilities", value)) => {
                spec.capabilities
                    .extend(value.split(';').map(|c| c.to_string()));
                last = Some(ListField::Capabilities);
            }
            Some(("count", value)) => {
                last = None;
                if value == "all" {
                    continue;
                }
                let count: i64 = value.parse().map_err(|_| {
                    StevedoreError::InvalidInput(format!("invalid gpu count: {value}"))
                })?;
                match count {
                    // -1 selects every device, like count=all
                    -1 => {}
                    c if c > 0 => {
                        spec.devices.extend((0..c).map(|i| i.to_string()));
                    }
                    c => {
                        return Err(StevedoreError::InvalidInput(format!(
                            "invalid gpu count: {c}"
                        )))
                    }
                }
            }
            Some(("driver", value)) => {
                last = None;
                if !value.is_empty() && value != "nvidia" {
                    return Err(StevedoreError::InvalidInput(format!(
                        "invalid gpu driver: {value}"
                    )));
                }
                spec.driver = Some(value.to_string());
            }
            Some((other, _)) => {
                return Err(StevedoreError::InvalidInput(format!(
                    "invalid gpus field: {other}"
                )))
            }
            None => match last {
                Some(ListField::Device) => spec.devices.push(token.to_string()),
                Some(ListField::Capabilities) => spec.capabilities.push(token.to_string()),
                None => {
                    return Err(StevedoreError::InvalidInput(format!(
                        "invalid gpus field: {token}"
                    )))
                }
            },
        }
    }
    Ok(spec)
}

/// Argv for the toolkit hook. Rootless engines cannot manage the device
/// cgroup, hence `--no-cgroups`.
pub fn hook_args(spec: &GpuSpec, rootless: bool) -> Vec<String> {
    let mut args = vec![NVIDIA_CLI.to_string(), "configure".to_string()];
    if rootless {
        args.push("--no-cgroups".to_string());
    }
    if spec.devices.is_empty() {
        args.push("--device=all".to_string());
    } else {
        args.push(format!("--device={}", spec.devices.join(",")));
    }
    let capabilities: Vec<&str> = if spec.capabilities.is_empty() {
        vec!["utility", "compute"]
    } else {
        spec.capabilities.iter().map(String::as_str).collect()
    };
    for capability in capabilities {
        args.push(format!("--{capability}"));
    }
    args.push("--pid={{pid}}".to_string());
    args
}

/// Absolute path for the hook entry: hook paths must be absolute per the
/// OCI runtime spec. Looked up on PATH; when absent the conventional
/// install location is used so assembly does not require the toolkit on
/// the assembling host.
fn toolkit_path() -> PathBuf {
    env::var_os("PATH")
        .and_then(|p| {
            env::split_paths(&p)
                .map(|dir| dir.join(NVIDIA_CLI))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| PathBuf::from("/usr/bin").join(NVIDIA_CLI))
}

pub fn configure(opts: &ContainerOptions) -> Result<SpecMutator> {
    if opts.gpus.is_empty() {
        return Ok(Box::new(|_spec: &mut Spec| Ok(())));
    }

    let mut merged = GpuSpec::default();
    for flag in &opts.gpus {
        let parsed = parse_gpus(flag)?;
        merged.devices.extend(parsed.devices);
        merged.capabilities.extend(parsed.capabilities);
        if parsed.driver.is_some() {
            merged.driver = parsed.driver;
        }
    }
    let rootless = nix::unistd::geteuid().as_raw() != 0;
    let args = hook_args(&merged, rootless);
    let path = toolkit_path();

    Ok(Box::new(move |spec: &mut Spec| {
        let hook = HookBuilder::default()
            .path(path.clone())
            .args(args)
            .build()
            .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;

        let mut create_runtime = spec
            .hooks()
            .as_ref()
            .and_then(|h| h.create_runtime().clone())
            .unwrap_or_default();
        create_runtime.push(hook);

        let mut builder = HooksBuilder::default().create_runtime(create_runtime);
        if let Some(poststop) = spec.hooks().as_ref().and_then(|h| h.poststop().clone()) {
            builder = builder.poststop(poststop);
        }
        let hooks = builder
            .build()
            .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
        spec.set_hooks(Some(hooks));
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ImageSource;

    #[test]
    fn test_parse_all() {
        assert_eq!(parse_gpus("all").unwrap(), GpuSpec::default());
        assert_eq!(parse_gpus("-1").unwrap(), GpuSpec::default());
    }

    #[test]
    fn test_parse_count_and_devices() {
        let spec = parse_gpus("2").unwrap();
        assert_eq!(spec.devices, vec!["0", "1"]);

        let spec = parse_gpus("device=GPU-uuid,capabilities=utility;graphics").unwrap();
        assert_eq!(spec.devices, vec!["GPU-uuid"]);
        assert_eq!(spec.capabilities, vec!["utility", "graphics"]);

        assert!(parse_gpus("0").is_err());
        assert!(parse_gpus("-2").is_err());
        assert!(parse_gpus("count=x").is_err());
        assert!(parse_gpus("count=0").is_err());
        assert!(parse_gpus("model=a100").is_err());
    }

    #[test]
    fn test_parse_quoted_csv_with_comma_capabilities() {
        // the shell-quoted Docker form: one quoted field, bare tokens
        // continue the preceding list
        let spec = parse_gpus("\"device=GPU-abc,capabilities=utility,compute\"").unwrap();
        assert_eq!(spec.devices, vec!["GPU-abc"]);
        assert_eq!(spec.capabilities, vec!["utility", "compute"]);

        let spec =
            parse_gpus("\"device=GPU-abc\",\"capabilities=utility,compute\"").unwrap();
        assert_eq!(spec.devices, vec!["GPU-abc"]);
        assert_eq!(spec.capabilities, vec!["utility", "compute"]);

        // a bare token with nothing to continue is still rejected
        assert!(parse_gpus("count=1,compute").is_err());
    }

    #[test]
    fn test_parse_count_all_and_driver() {
        assert_eq!(parse_gpus("count=all").unwrap().devices, Vec::<String>::new());
        assert_eq!(parse_gpus("count=-1").unwrap().devices, Vec::<String>::new());
        assert_eq!(parse_gpus("count=3").unwrap().devices, vec!["0", "1", "2"]);

        let spec = parse_gpus("driver=nvidia,count=all").unwrap();
        assert_eq!(spec.driver.as_deref(), Some("nvidia"));
        assert!(parse_gpus("driver=amd").is_err());
    }

    #[test]
    fn test_hook_args() {
        let args = hook_args(&GpuSpec::default(), false);
        assert_eq!(args[0], NVIDIA_CLI);
        assert!(args.contains(&"--device=all".to_string()));
        assert!(args.contains(&"--utility".to_string()));
        assert!(args.contains(&"--compute".to_string()));
        assert!(!args.contains(&"--no-cgroups".to_string()));

        let args = hook_args(
            &GpuSpec {
                devices: vec!["0".into()],
                capabilities: vec!["graphics".into()],
                driver: None,
            },
            true,
        );
        assert!(args.contains(&"--device=0".to_string()));
        assert!(args.contains(&"--graphics".to_string()));
        assert!(args.contains(&"--no-cgroups".to_string()));
    }

    #[test]
    fn test_configure_adds_absolute_hook() {
        let mut o = ContainerOptions::new(
            ImageSource::Image("cuda-app".into()),
            PathBuf::from("/usr/bin/stevedore"),
        );
        o.gpus = vec!["\"device=GPU-abc,capabilities=utility,compute\"".to_string()];

        let mut spec = Spec::default();
        configure(&o).unwrap()(&mut spec).unwrap();

        let hooks = spec.hooks().as_ref().unwrap();
        let hook = &hooks.create_runtime().as_ref().unwrap()[0];
        assert!(hook.path().is_absolute());
        let args = hook.args().as_ref().unwrap();
        assert!(args.contains(&"--device=GPU-abc".to_string()));
        assert!(args.contains(&"--utility".to_string()));
        assert!(args.contains(&"--compute".to_string()));
    }
}
