use ash::prelude::VkResult;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

/// Attaches the name of the originating Vulkan call to a failed result.
///
/// Every setup call goes through this; the resulting report travels up to the host, which
/// terminates the process with it. Staleness codes are handled before reaching here.
pub trait VkCheck<T> {
    fn check(self, call: &'static str) -> Result<T>;
}

impl<T> VkCheck<T> for VkResult<T> {
    fn check(self, call: &'static str) -> Result<T> {
        self.wrap_err_with(|| format!("{call} failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn report_names_call_and_code() {
        let result: VkResult<()> = Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        let report = result.check("vkCreateInstance").unwrap_err();
        assert_eq!(report.to_string(), "vkCreateInstance failed");
        assert_eq!(
            report.root_cause().to_string(),
            vk::Result::ERROR_INITIALIZATION_FAILED.to_string()
        );
    }

    #[test]
    fn success_passes_through() {
        let result: VkResult<u32> = Ok(7);
        assert_eq!(result.check("vkAcquireNextImageKHR").unwrap(), 7);
    }
}
