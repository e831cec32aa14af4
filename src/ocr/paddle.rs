use image::DynamicImage;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

use super::{LanguageSelection, OcrLanguage, Recognizer, flatten_text};
use crate::error::RecognitionError;

const INIT_MARKER: &str = "OCR init completed";
const CODE_SUCCESS: i64 = 100;
const CODE_NO_TEXT: i64 = 101;

#[derive(Debug, Clone)]
pub struct PaddleJsonConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Overrides the model config picked from the language.
    pub config_path: Option<PathBuf>,
}

/// Keeps a PaddleOCR-json process alive and exchanges one JSON line per crop.
pub struct PaddleJsonRecognizer {
    language: LanguageSelection,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[derive(Debug, Deserialize)]
struct PaddleResponse {
    code: i64,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PaddleBlock {
    #[serde(default)]
    text: String,
}

fn default_config_for(language: OcrLanguage) -> &'static str {
    match language {
        OcrLanguage::ChineseSimplified => "models/config_chinese.txt",
        OcrLanguage::ChineseTraditional => "models/config_chinese_cht.txt",
        OcrLanguage::Japanese => "models/config_japan.txt",
        OcrLanguage::English => "models/config_en.txt",
        OcrLanguage::Korean => "models/config_korean.txt",
    }
}

impl PaddleJsonRecognizer {
    pub fn spawn(
        language: LanguageSelection,
        config: PaddleJsonConfig,
    ) -> Result<Self, RecognitionError> {
        if language.languages().len() > 1 {
            return Err(RecognitionError::UnsupportedLanguage(format!(
                "{} (paddle-json loads one language model at a time)",
                language
            )));
        }
        let config_path = config
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_config_for(language.primary())));

        let mut command = Command::new(&config.executable);
        command
            .args(&config.args)
            .arg(format!("--config_path={}", config_path.display()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = config.executable.parent()
            && !dir.as_os_str().is_empty()
            && dir.is_dir()
        {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(|err| {
            RecognitionError::NotInitialized(format!(
                "failed to start {}: {}",
                config.executable.display(),
                err
            ))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(RecognitionError::NotInitialized(
                "paddle-json pipes unavailable".to_string(),
            ));
        };
        let mut stdout = BufReader::new(stdout);
        if let Err(err) = wait_for_init(&mut stdout) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
        debug!("paddle-json ready ({})", config_path.display());
        Ok(Self {
            language,
            child,
            stdin,
            stdout,
        })
    }
}

fn wait_for_init(stdout: &mut impl BufRead) -> Result<(), RecognitionError> {
    let mut line = String::new();
    loop {
        line.clear();
        if stdout.read_line(&mut line)? == 0 {
            return Err(RecognitionError::NotInitialized(
                "paddle-json exited before initialization".to_string(),
            ));
        }
        if line.contains(INIT_MARKER) {
            return Ok(());
        }
    }
}

fn parse_response(line: &str) -> Result<String, RecognitionError> {
    let response: PaddleResponse = serde_json::from_str(line.trim()).map_err(|err| {
        RecognitionError::engine(format!("invalid paddle-json response: {}", err))
    })?;
    match response.code {
        CODE_SUCCESS => {
            let blocks: Vec<PaddleBlock> = serde_json::from_value(response.data).map_err(|err| {
                RecognitionError::engine(format!("invalid paddle-json data: {}", err))
            })?;
            Ok(flatten_text(blocks.iter().map(|block| block.text.as_str())))
        }
        CODE_NO_TEXT => Ok(String::new()),
        code => Err(RecognitionError::engine(format!(
            "paddle-json code {}: {}",
            code, response.data
        ))),
    }
}

impl Recognizer for PaddleJsonRecognizer {
    fn name(&self) -> &'static str {
        "paddle-json"
    }

    fn language(&self) -> &LanguageSelection {
        &self.language
    }

    fn recognize(&mut self, crop: &DynamicImage) -> Result<String, RecognitionError> {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile()?;
        crop.write_to(&mut tmp, image::ImageFormat::Png)
            .map_err(|err| RecognitionError::engine(format!("failed to write crop: {}", err)))?;
        tmp.flush()?;

        let request = serde_json::json!({ "image_path": tmp.path() });
        writeln!(self.stdin, "{}", request)?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(RecognitionError::engine("paddle-json closed its output"));
        }
        parse_response(&line)
    }
}

impl Drop for PaddleJsonRecognizer {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            warn!("failed to stop paddle-json: {}", err);
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn success_response_joins_blocks_in_engine_order() {
        let line = r#"{"code":100,"data":[{"box":[[0,0]],"score":0.9,"text":"第一"},{"text":"line two"}]}"#;
        assert_eq!(parse_response(line).expect("parse"), "第一 line two");
    }

    #[test]
    fn no_text_code_is_empty_success() {
        let line = r#"{"code":101,"data":"No text found in image."}"#;
        assert_eq!(parse_response(line).expect("parse"), "");
    }

    #[test]
    fn other_codes_are_engine_errors() {
        let line = r#"{"code":200,"data":"Image path dose not exist."}"#;
        assert!(matches!(
            parse_response(line),
            Err(RecognitionError::Engine(message)) if message.contains("200")
        ));
        assert!(parse_response("not json").is_err());
    }

    #[test]
    fn multi_language_selection_is_rejected() {
        let language: LanguageSelection = "ch_sim+ja".parse().expect("parse");
        let config = PaddleJsonConfig {
            executable: PathBuf::from("PaddleOCR-json"),
            args: Vec::new(),
            config_path: None,
        };
        assert!(matches!(
            PaddleJsonRecognizer::spawn(language, config),
            Err(RecognitionError::UnsupportedLanguage(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn talks_to_a_line_protocol_child() {
        let dir = tempdir().expect("tempdir");
        let script = dir.path().join("fake-paddle.sh");
        std::fs::write(
            &script,
            "echo 'PaddleOCR-json v1.4'\n\
             echo 'OCR init completed.'\n\
             while read -r line; do\n\
               echo '{\"code\":100,\"data\":[{\"text\":\"AB\"},{\"text\":\"CD\"}]}'\n\
             done\n",
        )
        .expect("write script");
        let config = PaddleJsonConfig {
            executable: PathBuf::from("sh"),
            args: vec![script.to_string_lossy().to_string()],
            config_path: None,
        };
        let language = LanguageSelection::single(OcrLanguage::Japanese);
        let mut recognizer = PaddleJsonRecognizer::spawn(language, config).expect("spawn");
        let crop = DynamicImage::new_rgba8(8, 8);
        assert_eq!(recognizer.recognize(&crop).expect("recognize"), "AB CD");
        assert_eq!(recognizer.recognize(&crop).expect("recognize"), "AB CD");
    }
}
