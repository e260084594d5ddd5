
#[cfg(test)]
mod tests {
    use crate::types::{AccessType, Type};
    use crate::{find_smali_files, format_smali, ReaderOptions};
    use std::path::Path;

    #[test]
    fn class_names() {
        let t = Type::from_class_name("com.basic.Test");
        assert_eq!(t.descriptor(), "Lcom/basic/Test;");
        assert_eq!(t.class_name().unwrap(), "com.basic.Test");
    }

    #[test]
    fn access_order_is_canonical() {
        let a = AccessType::FINAL | AccessType::STATIC | AccessType::PUBLIC;
        let b = AccessType::PUBLIC | AccessType::FINAL | AccessType::STATIC;
        assert_eq!(a.render(), b.render());
        assert_eq!(a.render(), "public static final");
        assert!(a.contains(AccessType::PUBLIC) && !a.contains(AccessType::PRIVATE));
    }

    #[test]
    fn finds_fixtures() {
        let files = find_smali_files(Path::new("tests")).unwrap();
        assert!(files.iter().any(|p| p.ends_with("Sample.smali")));
        assert!(files.iter().all(|p| p.extension().map_or(false, |e| e == "smali")));
    }

    #[test]
    fn format_fixture() {
        let source = std::fs::read_to_string("tests/Sample.smali").unwrap();
        let smali = format_smali(&source, ReaderOptions::default()).unwrap();

        // Attempt to parse the output
        let again = format_smali(&smali, ReaderOptions::default()).unwrap();
        assert_eq!(smali, again);
    }
}
