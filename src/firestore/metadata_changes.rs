/// Controls whether metadata-only changes trigger snapshot events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataChanges {
    /// Listen to changes in metadata as well as data.
    ///
    /// Snapshot events will be triggered on metadata changes in addition to data changes.
    Include,

    /// Do not listen to metadata-only changes.
    ///
    /// Snapshot events will only be triggered when the document data changes.
    /// This is the default behavior.
    #[default]
    Exclude,
}

impl MetadataChanges {
    pub(crate) fn includes_metadata(self) -> bool {
        self == MetadataChanges::Include
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_changes_default() {
        assert_eq!(MetadataChanges::default(), MetadataChanges::Exclude);
        assert!(!MetadataChanges::default().includes_metadata());
        assert!(MetadataChanges::Include.includes_metadata());
    }
}
