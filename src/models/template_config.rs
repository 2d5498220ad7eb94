/// 模板引擎配置
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub cache: bool,            // 是否缓存编译结果（按路径与内联内容）
    pub strict_variables: bool, // 未定义变量是否报错
    pub max_depth: usize,       // include / extends / macro 的最大嵌套深度
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateConfig {
    pub fn new() -> Self {
        TemplateConfig {
            cache: true,
            strict_variables: false,
            max_depth: 64,
        }
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn strict_variables(mut self, strict_variables: bool) -> Self {
        self.strict_variables = strict_variables;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builder() {
        let config = TemplateConfig::default();
        assert!(config.cache);
        assert!(!config.strict_variables);
        assert_eq!(config.max_depth, 64);

        let config = TemplateConfig::new()
            .cache(false)
            .strict_variables(true)
            .max_depth(8);
        assert!(!config.cache);
        assert!(config.strict_variables);
        assert_eq!(config.max_depth, 8);
    }
}
