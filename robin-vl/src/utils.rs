//! Device configuration and Candle error conversion helpers.

use candle_core::Device;
use robin_core::core::RobinError;

#[cfg(not(feature = "cuda"))]
fn cuda_not_enabled() -> RobinError {
    RobinError::config_error("CUDA support not enabled. Compile with --features cuda")
}

/// Parses a device string and creates a Candle [`Device`].
///
/// # Supported formats
///
/// - `"cpu"` → CPU device
/// - `"cuda"` or `"gpu"` → CUDA device 0
/// - `"cuda:N"` → CUDA device N (e.g., `"cuda:1"`)
///
/// # Examples
///
/// ```no_run
/// use robin_vl::utils::parse_device;
///
/// let cpu = parse_device("cpu").unwrap();
/// let cuda1 = parse_device("cuda:1").unwrap();
/// ```
pub fn parse_device(device_str: &str) -> Result<Device, RobinError> {
    let device_str = device_str.trim().to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0).map_err(|e| {
                    RobinError::config_error(format!("Failed to create CUDA device: {e}"))
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        s if s.starts_with("cuda:") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = s["cuda:".len()..].parse().map_err(|_| {
                    RobinError::config_error(format!("Invalid CUDA device ordinal in '{s}'"))
                })?;
                Device::new_cuda(ordinal).map_err(|e| {
                    RobinError::config_error(format!(
                        "Failed to create CUDA device {ordinal}: {e}"
                    ))
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        _ => Err(RobinError::config_error(format!(
            "Unknown device: '{device_str}'. Use 'cpu', 'cuda', or 'cuda:N'"
        ))),
    }
}

/// Convert a Candle error to a [`RobinError`] for inference operations.
pub fn candle_to_inference(
    model_name: &str,
    context: impl Into<String>,
    err: candle_core::Error,
) -> RobinError {
    RobinError::Inference {
        model_name: model_name.to_string(),
        context: context.into(),
        source: Box::new(err),
    }
}

/// Convert a Candle error to a [`RobinError`] for tensor manipulation.
pub fn candle_to_processing(context: impl Into<String>, err: candle_core::Error) -> RobinError {
    RobinError::tensor_operation(context, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_cpu_is_case_insensitive() -> Result<(), RobinError> {
        assert!(matches!(parse_device("CPU")?, Device::Cpu));
        assert!(matches!(parse_device(" cpu ")?, Device::Cpu));
        Ok(())
    }

    #[test]
    fn test_parse_device_rejects_unknown() {
        let err = parse_device("tpu").unwrap_err();
        assert!(matches!(err, RobinError::ConfigError { .. }));
    }

    #[test]
    fn test_parse_device_rejects_bad_ordinal() {
        let err = parse_device("cuda:x").unwrap_err();
        assert!(matches!(err, RobinError::ConfigError { .. }));
        #[cfg(feature = "cuda")]
        assert!(err.to_string().contains("Invalid CUDA device ordinal"));
    }

    #[test]
    fn test_candle_to_processing_is_tensor_stage() {
        let err = candle_to_processing("stack", candle_core::Error::Msg("boom".to_string()));
        assert!(matches!(
            err,
            RobinError::Processing {
                kind: robin_core::core::ProcessingStage::TensorOperation,
                ..
            }
        ));
    }
}
