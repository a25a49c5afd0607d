//! Language registry and starter templates.
//!
//! Each supported language maps a short code (`python`, `cpp`, ...) to the
//! compile steps, run command, well-known sandbox filenames and the base
//! container image used to execute it. The registry is built once at
//! startup and read-only afterwards.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Immutable descriptor for one supported language.
#[derive(Debug, Clone)]
pub struct Language {
    /// Human readable name, e.g. `Python (pypy)`.
    pub display_name: &'static str,
    /// Prefix of the dockerfile the base image is built from.
    pub dockerfile: &'static str,
    /// Compiler label when the language is compiled rather than interpreted.
    pub compiler: Option<&'static str>,
    /// Single command executed for the run phase.
    pub run_command: &'static str,
    /// Ordered compile steps; empty for interpreted languages.
    pub compile_steps: &'static [&'static str],
    pub interpreter: bool,
    /// Base container image the sandbox runs in.
    pub image: &'static str,
    /// Filename the submitted source is materialized as.
    pub source_file: &'static str,
    /// Filename the test stdin lines are materialized as.
    pub input_file: &'static str,
    /// Artifact name the captured standard output is persisted under.
    pub output_file: &'static str,
    /// Artifact name the captured error output is persisted under.
    pub output_err_file: &'static str,
    /// Artifact name the captured compiler output is persisted under.
    pub compiler_output_file: &'static str,
}

macro_rules! language {
    (
        $display:expr, $dockerfile:expr, $compiler:expr, $image:expr, $source:expr,
        run: $run:expr, compile: [$($step:expr),*]
    ) => {
        Language {
            display_name: $display,
            dockerfile: $dockerfile,
            compiler: $compiler,
            run_command: $run,
            compile_steps: &[$($step),*],
            interpreter: language!(@interpreted $($step),*),
            image: $image,
            source_file: $source,
            input_file: "input",
            output_file: "output",
            output_err_file: "output_error",
            compiler_output_file: "compile",
        }
    };
    (@interpreted) => { true };
    (@interpreted $($step:expr),+) => { false };
}

/// Read-only mapping from language code to language descriptor.
pub static LANGUAGES: Lazy<HashMap<&'static str, Language>> = Lazy::new(|| {
    HashMap::from([
        (
            "python",
            language!(
                "Python (pypy)", "python", None, "virtual_machine_python", "solution.py",
                run: "pypy /input/solution.py", compile: []
            ),
        ),
        (
            "python2",
            language!(
                "Python 2 (pypy)", "python2", None, "virtual_machine_python2", "solution.py",
                run: "pypy /input/solution.py", compile: []
            ),
        ),
        (
            "node",
            language!(
                "NodeJs (Javascript)", "node", None, "virtual_machine_node", "solution.js",
                run: "node /input/solution.js", compile: []
            ),
        ),
        (
            "ruby",
            language!(
                "Ruby", "ruby", None, "virtual_machine_ruby", "solution.rb",
                run: "ruby /input/solution.rb", compile: []
            ),
        ),
        (
            "rust",
            language!(
                "Rust", "rust", Some("rustc"), "virtual_machine_rust", "solution.rs",
                run: "/solution", compile: ["rustc -o /solution /input/solution.rs"]
            ),
        ),
        (
            "go",
            language!(
                "Golang", "go", Some("go"), "virtual_machine_go", "solution.go",
                run: "/solution",
                compile: [
                    "cp /input/solution.go /project/main.go",
                    "go build -o /solution /project/main.go"
                ]
            ),
        ),
        (
            "haskell",
            language!(
                "Haskell", "haskell", Some("ghc"), "virtual_machine_haskell", "solution.hs",
                run: "/solution", compile: ["ghc -o /solution /input/solution.hs"]
            ),
        ),
        (
            "c",
            language!(
                "C", "gcc", Some("gcc"), "virtual_machine_gcc", "solution.c",
                run: "/solution",
                compile: ["gcc -g -O2 -std=gnu11 -static -o /solution /input/solution.c -lm"]
            ),
        ),
        (
            "cpp",
            language!(
                "C++", "gcc", Some("gcc"), "virtual_machine_gcc", "solution.cpp",
                run: "/solution",
                compile: [
                    "g++ -g -O2 -std=gnu++17 -static -lrt -Wl,--whole-archive -lpthread \
                     -Wl,--no-whole-archive -o /solution /input/solution.cpp"
                ]
            ),
        ),
        (
            "csharp",
            language!(
                "C#", "dotnet6", Some("dotnet6"), "virtual_machine_dotnet6", "solution.cs",
                run: "/build-output/projectc",
                compile: [
                    "cp /input/solution.cs /projectc/Program.cs",
                    "dotnet build --configuration Release -o /build-output/ /projectc/"
                ]
            ),
        ),
        (
            "fsharp",
            language!(
                "F#", "dotnet6", Some("dotnet6"), "virtual_machine_dotnet6", "solution.fs",
                run: "/build-output/projectf",
                compile: [
                    "cp /input/solution.fs /projectf/Program.fs",
                    "dotnet build --configuration Release -o /build-output/ /projectf/"
                ]
            ),
        ),
        // Java insists on the file name matching the public class, so the
        // submitted source must define a `Solution` class and nothing else.
        (
            "java",
            language!(
                "Java", "openjdk", Some("openjdk"), "virtual_machine_openjdk", "Solution.java",
                run: "java -Xmx2048m -cp . Solution", compile: ["javac /input/Solution.java"]
            ),
        ),
        (
            "scala",
            language!(
                "Scala", "openjdk", Some("openjdk"), "virtual_machine_openjdk", "Solution.scala",
                run: "/scala -J-Xmx2048m -cp . Solution", compile: ["/scalac /input/Solution.scala"]
            ),
        ),
        (
            "kotlin",
            language!(
                "Kotlin", "openjdk", Some("openjdk"), "virtual_machine_openjdk", "solution.kt",
                run: "java -Xmx2048m -jar /solution.jar",
                compile: ["/kotlinc solution.kt -include-runtime -d /solution.jar"]
            ),
        ),
    ])
});

/// Bundled starter templates, embedded at build time. Languages missing
/// from this table are logged and omitted from [`TEMPLATES`].
const TEMPLATE_ASSETS: &[(&str, &str)] = &[
    ("python", include_str!("../assets/templates/python.txt")),
    ("node", include_str!("../assets/templates/node.txt")),
    ("c", include_str!("../assets/templates/c.txt")),
    ("cpp", include_str!("../assets/templates/cpp.txt")),
    ("rust", include_str!("../assets/templates/rust.txt")),
    ("go", include_str!("../assets/templates/go.txt")),
    ("java", include_str!("../assets/templates/java.txt")),
];

/// Read-only mapping from language code to starter-template text.
pub static TEMPLATES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut templates = HashMap::new();

    for code in LANGUAGES.keys() {
        match TEMPLATE_ASSETS.iter().find(|(lang, _)| lang == code) {
            Some((lang, text)) => {
                templates.insert(*lang, *text);
            }
            None => log::warn!("language {} does not have a starter template", code),
        }
    }

    templates
});

/// Look up a language descriptor by its short code.
pub fn by_code(code: &str) -> Option<&'static Language> {
    LANGUAGES.get(code)
}

/// Supported languages as (code, display name) pairs, sorted by display
/// name for stable listing output.
pub fn supported() -> Vec<(&'static str, &'static str)> {
    let mut supported: Vec<_> = LANGUAGES
        .iter()
        .map(|(code, language)| (*code, language.display_name))
        .collect();

    supported.sort_by_key(|(_, display_name)| *display_name);
    supported
}

/// Languages deduplicated by base image. C and C++ share the GCC image, and
/// the JVM languages share the OpenJDK image; the image build tool builds
/// each image once rather than once per language.
pub fn unique_by_image() -> Vec<(&'static str, &'static Language)> {
    let mut seen = Vec::new();
    let mut unique = Vec::new();

    let mut codes: Vec<_> = LANGUAGES.keys().collect();
    codes.sort();

    for code in codes {
        let language = &LANGUAGES[code];

        if seen.contains(&language.image) {
            continue;
        }

        seen.push(language.image);
        unique.push((*code, language));
    }

    unique
}
