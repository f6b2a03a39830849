pub mod attribute;
pub mod class;
pub mod descriptor;
pub mod field;
pub mod method;
pub mod version;
