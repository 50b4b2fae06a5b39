//! End-to-end checks of the shipped language profiles.

use pretty_assertions::assert_eq;
use vulnlens_common::{Language, Match};
use vulnlens_rules::ProfileSet;

const CORPUS: &[&str] = &[
    "",
    "   \n\t\n",
    "import os\nos.system(cmd)  # run it\n",
    "/* header */\n<?php\n$x = shell_exec($_GET['c']); // bad\n",
    "a /* open\n\nnever closed",
    "x//*a*/* b */y",
    "url = 'http://example.com'  # comments inside strings are stripped too",
    "  line one  \r\n  line two\r\n",
    "/*/**/*/ z",
    "#!/usr/bin/env python\n\n\nprint('hi')\n",
    "String s = \"#tag\"; // done\nRuntime.getRuntime().exec(s);",
];

#[test]
fn normalization_is_idempotent_for_every_profile() {
    let profiles = ProfileSet::builtin().unwrap();
    for language in Language::ALL {
        let profile = profiles.get(language).unwrap();
        for raw in CORPUS {
            let once = profile.normalize(raw);
            assert_eq!(profile.normalize(&once), once, "{language}: {raw:?}");
        }
    }
}

#[test]
fn python_command_injection() {
    let profiles = ProfileSet::builtin().unwrap();
    let python = profiles.get(Language::Python).unwrap();

    let matches = python.scan("import os\ncmd = 'ls'\nos.system(cmd)\n");
    assert!(matches.contains(&Match::new("os.system(cmd)", "Command Injection")));

    assert!(python.scan("print(\"hello\")").is_empty());
}

#[test]
fn javascript_document_write_is_xss() {
    let profiles = ProfileSet::builtin().unwrap();
    let js = profiles.get(Language::JavaScript).unwrap();

    let matches = js.scan("document.write(userInput)");
    assert_eq!(matches, vec![Match::new("document.write(userInput)", "Cross-Site Scripting (XSS)")]);
}

#[test]
fn commented_out_calls_are_not_reported() {
    let profiles = ProfileSet::builtin().unwrap();
    let php = profiles.get(Language::Php).unwrap();
    let matches = php.scan("<?php\n// eval($code);\n/* system($cmd); */\n# exec($x);\necho 'ok';\n");
    assert!(matches.is_empty(), "{matches:?}");
}

#[test]
fn removing_a_line_removes_exactly_its_matches() {
    let profiles = ProfileSet::builtin().unwrap();
    let java = profiles.get(Language::Java).unwrap();

    let lines = [
        "Socket s = new Socket(host, 80);",
        "int x = 1;",
        "Class c = Class.forName(name);",
        "System.out.println(x);",
    ];
    let full = java.scan(&lines.join("\n"));

    for (skip, removed) in lines.iter().enumerate() {
        let kept: Vec<&str> = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, l)| *l)
            .collect();
        let partial = java.scan(&kept.join("\n"));
        let expected: Vec<Match> = full
            .iter()
            .filter(|m| m.line != removed.trim())
            .cloned()
            .collect();
        assert_eq!(partial, expected, "removing {removed:?}");
    }
}

#[test]
fn duplicate_categories_on_one_line_are_all_reported() {
    let profiles = ProfileSet::builtin().unwrap();
    let java = profiles.get(Language::Java).unwrap();

    let matches = java.scan("ServerSocket server = new ServerSocket(8080);");
    let categories: Vec<&str> = matches.iter().map(|m| m.category.as_str()).collect();
    // `Socket`, `ServerSocket`.
    assert_eq!(categories, vec!["Network Communication", "Network Communication"]);
}
