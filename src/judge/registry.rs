use crate::config::types::Language;
use crate::judge::adapter::LanguageAdapter;
use crate::judge::languages::{cpp::CppAdapter, java::JavaAdapter, python::PythonAdapter};

static PYTHON: PythonAdapter = PythonAdapter;
static CPP: CppAdapter = CppAdapter;
static JAVA: JavaAdapter = JavaAdapter;

/// Adapters are stateless, so one shared instance per language is enough.
pub fn adapter_for(language: Language) -> &'static dyn LanguageAdapter {
    match language {
        Language::Python => &PYTHON,
        Language::Cpp => &CPP,
        Language::Java => &JAVA,
    }
}
