//! JSON 修复引擎
//!
//! 对可能损坏的持久化文本做一系列文本级修复并重试解析：
//! - 非标准字面量 (NaN / Infinity / -Infinity) 替换
//! - 去除闭合符前的多余逗号
//! - 补齐未闭合的括号、中括号和字符串
//!
//! 所有修复都在字符串感知的扫描器上进行，不会改动字符串字面量内部。

use serde_json::Value;
use thiserror::Error;

/// JSON 修复失败
#[derive(Debug, Error)]
pub enum RepairError {
    /// 输入为空
    #[error("empty input")]
    Empty,
    /// 所有修复尝试后仍无法解析
    #[error("unparseable JSON after all repair attempts: {0}")]
    Unrecoverable(String),
}

/// 修复解析的结果
#[derive(Debug, Clone)]
pub struct RepairedDocument {
    /// 解析出的值
    pub value: Value,
    /// 是否经过了修复 (非直接解析)
    pub repaired: bool,
}

/// 解析可能损坏的 JSON 文本
///
/// 依次尝试：直接解析 → 字面量替换 → 结构修复 → 两者组合。
/// 任何一步成功即返回；全部失败返回硬解析错误。
pub fn parse_with_repair(text: &str) -> Result<RepairedDocument, RepairError> {
    if text.trim().is_empty() {
        return Err(RepairError::Empty);
    }

    // 1. 直接解析
    let direct_err = match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            return Ok(RepairedDocument {
                value,
                repaired: false,
            })
        }
        Err(e) => e,
    };

    // 2. 字面量替换
    let substituted = replace_special_literals(text);
    if substituted != text {
        if let Ok(value) = serde_json::from_str::<Value>(&substituted) {
            return Ok(RepairedDocument {
                value,
                repaired: true,
            });
        }
    }

    // 3. 结构修复：先补齐闭合符，再去多余逗号
    let structural = strip_trailing_commas(&close_unbalanced(text));
    if let Ok(value) = serde_json::from_str::<Value>(&structural) {
        return Ok(RepairedDocument {
            value,
            repaired: true,
        });
    }

    // 4. 字面量替换 + 结构修复
    let combined = strip_trailing_commas(&close_unbalanced(&substituted));
    if let Ok(value) = serde_json::from_str::<Value>(&combined) {
        return Ok(RepairedDocument {
            value,
            repaired: true,
        });
    }

    Err(RepairError::Unrecoverable(direct_err.to_string()))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// 将字符串外的裸 NaN / Infinity / -Infinity 替换为 0
///
/// 标准 JSON 不允许这些记号，它们通常来自手工拼接或非标准序列化器。
pub fn replace_special_literals(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }

        let boundary_ok = i == 0 || !is_ident_char(chars[i - 1]);

        let token_len = if boundary_ok && c == 'N' && matches_token(&chars, i, "NaN") {
            Some(3)
        } else if boundary_ok && c == 'I' && matches_token(&chars, i, "Infinity") {
            Some(8)
        } else if boundary_ok && c == '-' && matches_token(&chars, i + 1, "Infinity") {
            Some(9)
        } else {
            None
        };

        match token_len {
            Some(len) => {
                out.push('0');
                i += len;
            }
            None => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn matches_token(chars: &[char], start: usize, token: &str) -> bool {
    let mut i = start;
    for tc in token.chars() {
        if i >= chars.len() || chars[i] != tc {
            return false;
        }
        i += 1;
    }
    // 记号后不能紧跟标识符字符
    i == chars.len() || !is_ident_char(chars[i])
}

/// 补齐未闭合的字符串、对象和数组
///
/// 截断的文档在此恢复为结构完整的文本；悬空的冒号补 null。
pub fn close_unbalanced(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    if in_string {
        out.push('"');
    }

    // 悬空冒号：`{"a":` → `{"a":null`
    if out.trim_end().ends_with(':') {
        out.push_str("null");
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }

    out
}

/// 去除对象和数组闭合符前的多余逗号
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }

        if c == ',' {
            // 前瞻：跳过空白，若下一个有效字符是闭合符则丢弃该逗号
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}
