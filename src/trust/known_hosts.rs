// known_hosts 行格式
//
// 与 OpenSSH known_hosts 兼容：
//   host[,host...] key-type base64 [comment]
// 非 22 端口写作 [host]:port
// @revoked 行标记吊销的公钥，匹配的主机出示该公钥时一律拒绝
// 空行、注释、其他 @marker 行（如 @cert-authority）和哈希主机（|1|...）原样保留，但不参与匹配

use super::fingerprint::HostKey;

pub const DEFAULT_PORT: u16 = 22;

/// known_hosts 中的一行
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    /// 可匹配的条目，保留原始文本
    Entry { raw: String, entry: KnownHostEntry },
    /// `@revoked` 标记的公钥
    Revoked { raw: String, entry: KnownHostEntry },
    /// 其他行（原样写回）
    Other(String),
}

impl Line {
    pub fn raw(&self) -> &str {
        match self {
            Line::Entry { raw, .. } | Line::Revoked { raw, .. } => raw,
            Line::Other(raw) => raw,
        }
    }

    pub fn entry(&self) -> Option<&KnownHostEntry> {
        match self {
            Line::Entry { entry, .. } => Some(entry),
            _ => None,
        }
    }

    pub fn revoked(&self) -> Option<&KnownHostEntry> {
        match self {
            Line::Revoked { entry, .. } => Some(entry),
            _ => None,
        }
    }
}

/// 一条已信任的公钥
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownHostEntry {
    /// 主机模式列表（支持 * ? 和 ! 取反）
    pub hosts: Vec<String>,
    pub key: HostKey,
    pub comment: Option<String>,
}

impl KnownHostEntry {
    pub fn new(host: &str, key: HostKey) -> Self {
        Self {
            hosts: vec![host.to_string()],
            key,
            comment: None,
        }
    }

    /// 主机是否匹配：任一正向模式命中且没有取反模式命中
    pub fn matches(&self, host: &str) -> bool {
        let mut matched = false;
        for pattern in &self.hosts {
            if let Some(negated) = pattern.strip_prefix('!') {
                if wildcard_match(negated, host) {
                    return false;
                }
            } else if wildcard_match(pattern, host) {
                matched = true;
            }
        }
        matched
    }

    /// 主机列表中是否有与之完全相同的一项（忽略大小写）
    pub fn lists_exactly(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} {} {}",
            self.hosts.join(","),
            self.key.algorithm,
            self.key.to_base64()
        );
        if let Some(comment) = &self.comment {
            line.push(' ');
            line.push_str(comment);
        }
        line
    }
}

/// 解析一行；无法识别的行作为 Other 保留
pub fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Other(line.to_string());
    }

    if let Some(rest) = trimmed.strip_prefix('@') {
        let (marker, rest) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        return match parse_entry(rest) {
            Some(entry) if marker == "revoked" => Line::Revoked {
                raw: line.to_string(),
                entry,
            },
            _ => Line::Other(line.to_string()),
        };
    }

    match parse_entry(trimmed) {
        Some(entry) => Line::Entry {
            raw: line.to_string(),
            entry,
        },
        None => Line::Other(line.to_string()),
    }
}

fn parse_entry(text: &str) -> Option<KnownHostEntry> {
    let mut fields = text.split_whitespace();
    let (hosts, algorithm, encoded) = (fields.next()?, fields.next()?, fields.next()?);
    if hosts.starts_with('|') {
        return None;
    }
    let key = HostKey::from_base64(algorithm, encoded).ok()?;

    let comment = fields.collect::<Vec<_>>().join(" ");
    Some(KnownHostEntry {
        hosts: hosts
            .split(',')
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect(),
        key,
        comment: (!comment.is_empty()).then_some(comment),
    })
}

/// 解析整个文件内容
pub fn parse(content: &str) -> Vec<Line> {
    content.lines().map(parse_line).collect()
}

/// 主机在 known_hosts 中的写法
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == DEFAULT_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// 通配符匹配（* 任意长度，? 单个字符），忽略大小写
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let t: Vec<char> = text.to_ascii_lowercase().chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> HostKey {
        HostKey::new("ssh-ed25519", vec![byte; 32])
    }

    #[test]
    fn test_parse_entry_with_comment() {
        let line = format!("db1,100.64.0.2 ssh-ed25519 {} added by hand", key(1).to_base64());
        let Line::Entry { raw, entry } = parse_line(&line) else {
            panic!("expected entry");
        };
        assert_eq!(raw, line);
        assert_eq!(entry.hosts, vec!["db1", "100.64.0.2"]);
        assert_eq!(entry.key, key(1));
        assert_eq!(entry.comment.as_deref(), Some("added by hand"));
        assert_eq!(entry.to_line(), line);
    }

    #[test]
    fn test_other_lines_preserved() {
        let encoded = key(1).to_base64();
        let lines = [
            "".to_string(),
            "# comment".to_string(),
            format!("@cert-authority *.example.com ssh-ed25519 {}", encoded),
            format!("|1|c2FsdA==|aGFzaA== ssh-ed25519 {}", encoded),
            "db1 ssh-ed25519".to_string(),
            "db1 ssh-ed25519 %%%".to_string(),
        ];
        for line in &lines {
            assert_eq!(parse_line(line), Line::Other(line.clone()));
        }
    }

    #[test]
    fn test_revoked_line() {
        let line = format!("@revoked db1,*.lan ssh-ed25519 {}", key(7).to_base64());
        let parsed = parse_line(&line);
        assert_eq!(parsed.raw(), line);
        assert!(parsed.entry().is_none());

        let revoked = parsed.revoked().expect("revoked entry");
        assert_eq!(revoked.key, key(7));
        assert!(revoked.matches("db1"));
        assert!(revoked.matches("web.lan"));

        assert_eq!(parse_line("@revoked db1"), Line::Other("@revoked db1".to_string()));
    }

    #[test]
    fn test_wildcards_and_negation() {
        let entry = KnownHostEntry {
            hosts: vec![
                "*.example.com".to_string(),
                "!bad.example.com".to_string(),
                "db?".to_string(),
            ],
            key: key(1),
            comment: None,
        };
        assert!(entry.matches("web.example.com"));
        assert!(entry.matches("WEB.Example.COM"));
        assert!(!entry.matches("bad.example.com"));
        assert!(entry.matches("db1"));
        assert!(!entry.matches("db10"));
        assert!(!entry.matches("example.com"));
    }

    #[test]
    fn test_only_negation_never_matches() {
        let entry = KnownHostEntry {
            hosts: vec!["!db1".to_string()],
            key: key(1),
            comment: None,
        };
        assert!(!entry.matches("db2"));
    }

    #[test]
    fn test_host_pattern() {
        assert_eq!(host_pattern("db1", 22), "db1");
        assert_eq!(host_pattern("db1", 2222), "[db1]:2222");

        let entry = KnownHostEntry::new("[db1]:2222", key(1));
        assert!(entry.matches(&host_pattern("db1", 2222)));
        assert!(!entry.matches("db1"));
    }

    #[test]
    fn test_lists_exactly() {
        let entry = KnownHostEntry {
            hosts: vec!["db1".to_string(), "*.lan".to_string()],
            key: key(1),
            comment: None,
        };
        assert!(entry.lists_exactly("DB1"));
        assert!(!entry.lists_exactly("db"));
        assert!(!entry.lists_exactly("x.lan"));
    }
}
