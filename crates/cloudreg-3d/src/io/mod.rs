/// XYZ text reader and writer module.
pub mod xyz;
