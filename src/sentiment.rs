use serde::Serialize;
use std::collections::{HashMap, HashSet};

const POSITIVE_WORDS: &[&str] = &[
    "güzel", "harika", "mükemmel", "iyi", "başarılı", "mutlu", "seviyorum", "teşekkür",
    "olumlu", "kolay", "başardım", "anladım", "sevindim", "memnun", "keyifli", "hoş", "güven",
    "tatmin", "sakin", "rahat", "huzurlu", "neşeli", "coşkulu", "heyecanlı", "umutlu",
    "motivasyon", "azim", "kararlı", "istekli", "sevgi", "beğeni", "takdir", "gurur",
    "memnuniyet", "tatmin", "zevkli", "eğlenceli", "ödül", "başarı", "zafer", "faydalı",
    "yararlı", "değerli", "önemli", "anlamlı", "gelişim", "ilerleme", "öğrenme", "anlama",
    "kavrama", "çözme", "keşfetme",
];

const NEGATIVE_WORDS: &[&str] = &[
    "kötü", "zor", "yapamadım", "anlamadım", "üzgün", "mutsuz", "problem", "sorun", "sıkıntı",
    "başarısız", "hata", "zayıf", "yetersiz", "kaygı", "korku", "endişe", "stres", "gergin",
    "tedirgin", "karamsarlık", "umutsuz", "bezgin", "bıkkın", "yorgun", "tükenmişlik",
    "çaresiz", "güçsüz", "kayıp", "başarısızlık", "yenilgi", "karmaşık", "zorluk", "engel",
    "baskı", "gerilim", "kızgın", "öfkeli", "sinirli", "hayal kırıklığı", "üzüntü", "hüzün",
    "keder", "ağır", "yetersiz", "eksik", "anlamsız", "faydasız", "boşuna", "beyhude",
    "imkansız", "karışık", "anlaşılmaz", "çözülmez", "başedemiyorum", "yetişemiyorum",
    "yapamıyorum", "zorlanıyorum", "sıkılıyorum",
];

const MOTIVATION_WORDS: &[&str] = &[
    "istek", "arzu", "motivasyon", "azim", "kararlılık", "hedef", "amaç", "başarma",
    "çabalamak", "gayret", "emek", "istikrar", "çalışmak", "odaklanmak", "disiplin", "adanmak",
    "sebat", "ısrar", "süreklilik", "düzenli", "planlı", "programlı",
];

const ANXIETY_WORDS: &[&str] = &[
    "sınav", "sonuç", "korku", "endişe", "stres", "baskı", "kaygı", "gerginlik", "tedirginlik",
    "panik", "başarısızlık", "yetersizlik", "karşılaştırma", "rakip", "rekabet", "yarış",
    "derece", "sıralama", "puan", "yüksek", "düşük", "geçme", "kalma",
];

const KEY_WORD_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    Basic,
    Advanced,
    Comprehensive,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(Self::Basic),
            "advanced" => Some(Self::Advanced),
            "comprehensive" => Some(Self::Comprehensive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::Comprehensive => "comprehensive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

impl Scores {
    /// A side wins only when strictly above both others.
    pub fn dominant(&self) -> Sentiment {
        if self.positive > self.negative && self.positive > self.neutral {
            Sentiment::Positive
        } else if self.negative > self.positive && self.negative > self.neutral {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyWord {
    pub word: String,
    pub sentiment: Sentiment,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceResult {
    pub sentence: String,
    pub sentiment: Sentiment,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub mode: Mode,
    pub dominant: Sentiment,
    pub scores: Scores,
    pub intensity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_words: Option<Vec<KeyWord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anxiety: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivation_anxiety_balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentences: Option<Vec<SentenceResult>>,
}

/// `advanced` blends lexicon TF-IDF cosine with a 2-3 gram count cosine.
pub fn analyze(text: &str, mode: Mode) -> Analysis {
    let (scores, key_words) = match mode {
        Mode::Basic => (basic_scores(text), None),
        Mode::Advanced | Mode::Comprehensive => {
            let (s, k) = advanced_scores(text);
            (s, Some(k))
        }
    };

    let mut out = Analysis {
        mode,
        dominant: scores.dominant(),
        scores,
        intensity: scores.positive.max(scores.negative),
        key_words,
        motivation: None,
        anxiety: None,
        motivation_anxiety_balance: None,
        sentences: None,
    };

    if mode == Mode::Comprehensive {
        let words = clean(text);
        let words: Vec<&str> = words.split_whitespace().collect();
        let denom = words.len().max(1) as f64;
        let motivation = count_hits(&words, MOTIVATION_WORDS) as f64 / denom;
        let anxiety = count_hits(&words, ANXIETY_WORDS) as f64 / denom;
        out.motivation = Some(motivation);
        out.anxiety = Some(anxiety);
        out.motivation_anxiety_balance = Some(motivation - anxiety);
        out.sentences = Some(
            text.split('.')
                .map(str::trim)
                .filter(|s| s.chars().count() > 5)
                .map(|s| {
                    let sc = basic_scores(s);
                    SentenceResult {
                        sentence: s.to_string(),
                        sentiment: sc.dominant(),
                        score: sc.positive.max(sc.negative),
                    }
                })
                .collect(),
        );
    }
    out
}

/// Lowercases and turns punctuation into spaces.
pub fn clean(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if ".,;:?!-()[]{}".contains(c) { ' ' } else { c })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn count_hits(words: &[&str], lexicon: &[&str]) -> usize {
    words.iter().filter(|w| lexicon.contains(w)).count()
}

pub fn basic_scores(text: &str) -> Scores {
    let cleaned = clean(text);
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let pos = count_hits(&words, POSITIVE_WORDS);
    let neg = count_hits(&words, NEGATIVE_WORDS);
    let total = pos + neg;
    if total == 0 {
        return Scores {
            positive: 0.33,
            negative: 0.33,
            neutral: 0.34,
        };
    }
    let positive = pos as f64 / (total as f64 * 2.0);
    let negative = neg as f64 / (total as f64 * 2.0);
    Scores {
        positive,
        negative,
        neutral: 1.0 - (positive + negative),
    }
}

type SparseVec = HashMap<String, f64>;

/// Word tokens of two or more alphanumeric characters.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn ngrams(tokens: &[String], min: usize, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    for n in min..=max {
        if tokens.len() < n {
            break;
        }
        for w in tokens.windows(n) {
            out.push(w.join(" "));
        }
    }
    out
}

fn counts(terms: &[String]) -> SparseVec {
    let mut out = SparseVec::new();
    for t in terms {
        *out.entry(t.clone()).or_insert(0.0) += 1.0;
    }
    out
}

fn l2_normalize(v: &mut SparseVec) {
    let norm = v.values().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.values_mut() {
            *x /= norm;
        }
    }
}

fn cosine(a: &SparseVec, b: &SparseVec) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(k, x)| b.get(k).map(|y| x * y))
        .sum();
    let na = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.values().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Smoothed inverse document frequency over a small fixed corpus.
struct Tfidf {
    idf: HashMap<String, f64>,
}

impl Tfidf {
    fn fit(docs: &[Vec<String>]) -> Self {
        let n = docs.len() as f64;
        let mut df: HashMap<String, f64> = HashMap::new();
        for doc in docs {
            let uniq: HashSet<&String> = doc.iter().collect();
            for t in uniq {
                *df.entry(t.clone()).or_insert(0.0) += 1.0;
            }
        }
        let idf = df
            .into_iter()
            .map(|(t, d)| (t, ((1.0 + n) / (1.0 + d)).ln() + 1.0))
            .collect();
        Self { idf }
    }

    fn transform(&self, tokens: &[String]) -> SparseVec {
        let mut v: SparseVec = counts(tokens)
            .into_iter()
            .filter_map(|(t, c)| self.idf.get(&t).map(|w| (t, c * w)))
            .collect();
        l2_normalize(&mut v);
        v
    }
}

fn lexicon_doc(words: &[&str]) -> Vec<String> {
    tokenize(&words.join(" "))
}

pub fn advanced_scores(text: &str) -> (Scores, Vec<KeyWord>) {
    let cleaned = clean(text);
    let pos_doc = lexicon_doc(POSITIVE_WORDS);
    let neg_doc = lexicon_doc(NEGATIVE_WORDS);
    let text_doc = tokenize(&cleaned);

    let docs = [pos_doc.clone(), neg_doc.clone(), text_doc.clone()];
    let tfidf = Tfidf::fit(&docs);
    let pos_vec = tfidf.transform(&pos_doc);
    let neg_vec = tfidf.transform(&neg_doc);
    let text_vec = tfidf.transform(&text_doc);

    let word_pos = cosine(&text_vec, &pos_vec).max(0.0);
    let word_neg = cosine(&text_vec, &neg_vec).max(0.0);

    let gram_text = counts(&ngrams(&text_doc, 2, 3));
    let gram_pos = counts(&ngrams(&pos_doc, 2, 3));
    let gram_neg = counts(&ngrams(&neg_doc, 2, 3));
    let positive = 0.7 * word_pos + 0.3 * cosine(&gram_text, &gram_pos).max(0.0);
    let negative = 0.7 * word_neg + 0.3 * cosine(&gram_text, &gram_neg).max(0.0);

    let sum = positive + negative;
    let (positive, negative) = if sum > 0.0 {
        (positive / sum * 0.8, negative / sum * 0.8)
    } else {
        (0.4, 0.4)
    };
    let scores = Scores {
        positive,
        negative,
        neutral: 1.0 - (positive + negative),
    };

    // A single-word document is the unit vector on that word, so its cosine
    // against a lexicon is the lexicon's weight for the word.
    let mut key_words: Vec<KeyWord> = Vec::new();
    for word in cleaned.split_whitespace() {
        if key_words.iter().any(|k| k.word == word) || !tfidf.idf.contains_key(word) {
            continue;
        }
        let p = pos_vec.get(word).copied().unwrap_or(0.0);
        let n = neg_vec.get(word).copied().unwrap_or(0.0);
        if p == n {
            continue;
        }
        key_words.push(KeyWord {
            word: word.to_string(),
            sentiment: if p > n {
                Sentiment::Positive
            } else {
                Sentiment::Negative
            },
            score: (p - n).abs(),
        });
    }
    key_words.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.word.cmp(&b.word))
    });
    key_words.truncate(KEY_WORD_LIMIT);

    (scores, key_words)
}
