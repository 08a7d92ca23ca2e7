/// Contains configuration options for the renderer like the application name and validation
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub app_name: String,
    pub enable_validation: bool,
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "vkchain".into(),
            enable_validation: cfg!(debug_assertions),
            clear_color: [0.02, 0.02, 0.05, 1.0],
        }
    }
}
