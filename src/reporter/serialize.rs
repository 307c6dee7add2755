pub mod duration {
    use crate::time::DurationUnit;
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&DurationUnit::from(*duration))
    }
}
