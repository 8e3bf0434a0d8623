//! Configuration access port trait.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// All section names, lowercased and sorted.
    fn sections(&self) -> Vec<String>;

    fn has_key(&self, section: &str, key: &str) -> bool {
        self.get_string(section, key).is_some()
    }

    fn get_optional_double(&self, section: &str, key: &str) -> Option<f64> {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse::<f64>().ok())
    }
}
