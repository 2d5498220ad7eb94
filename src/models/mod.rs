pub mod template_config;
