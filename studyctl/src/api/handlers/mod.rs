pub mod icons;
pub mod task_settings;
