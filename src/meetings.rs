use serde::Serialize;
use std::collections::HashMap;

const SERVICE_DEVELOPMENTAL: &str = "Ö - Gelişimsel ve Önleyici Hizmetler";
const SERVICE_REMEDIAL: &str = "İ - İyileştirici Hizmetler";
const SERVICE_SUPPORT: &str = "D - Destek Hizmetler";

const CATEGORY_INFORMING: &str = "ÖOV - Bilgi Verme Çalışmaları";
const CATEGORY_PSYCHOSOCIAL: &str = "İP - Psikososyal Müdahale";
const CATEGORY_CONSULTING: &str = "DM - Müşavirlik";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Categories {
    pub person_role: String,
    pub service_type: String,
    pub work_category: String,
    pub work_area: String,
    pub method: String,
}

/// Derives reporting categories from the topic's MEB code prefix. Unknown
/// prefixes leave service/category/area empty.
pub fn categorize(topic: &str, method: &str) -> Categories {
    let mut out = Categories {
        person_role: "Öğrenci".to_string(),
        service_type: String::new(),
        work_category: String::new(),
        work_area: String::new(),
        method: method.to_string(),
    };
    let topic = topic.trim();
    if topic.is_empty() {
        return out;
    }

    if topic.starts_with("DMV") {
        out.person_role = "Veli".to_string();
    } else if topic.starts_with("DMÖ") {
        out.person_role = "Öğretmen".to_string();
    }

    let fixed = |service: &str, category: &str, area: &str| {
        (service.to_string(), category.to_string(), area.to_string())
    };
    let by_topic = |service: &str, category: &str| {
        (service.to_string(), category.to_string(), topic.to_string())
    };

    let picked = if topic.starts_with("ÖOVEb") {
        Some(fixed(SERVICE_DEVELOPMENTAL, CATEGORY_INFORMING, "ÖOVE - Akademik Gelişim"))
    } else if topic.starts_with("ÖOVMb") {
        Some(fixed(SERVICE_DEVELOPMENTAL, CATEGORY_INFORMING, "ÖOVM - Kariyer Gelişimi"))
    } else if topic.starts_with("ÖOVKb") {
        Some(fixed(
            SERVICE_DEVELOPMENTAL,
            CATEGORY_INFORMING,
            "ÖOVK - Sosyal Duygusal Gelişim",
        ))
    } else if ["B.K", "ÖOB", "RAM"].iter().any(|p| topic.starts_with(p)) {
        Some(by_topic(SERVICE_DEVELOPMENTAL, "ÖOB - Bireyi Tanıma Çalışmaları"))
    } else if topic.starts_with("ÖOYb") {
        Some(by_topic(SERVICE_DEVELOPMENTAL, "ÖOY - Yöneltme Ve İzleme"))
    } else if topic.starts_with("İB") {
        Some(by_topic(SERVICE_REMEDIAL, "İB - Bireysel Psikolojik Danışma"))
    } else if topic.starts_with("İPbB") {
        Some(fixed(SERVICE_REMEDIAL, CATEGORY_PSYCHOSOCIAL, "İPbB - Bildirim Yükümlülüğü"))
    } else if topic.starts_with("İPbİ") {
        Some(fixed(SERVICE_REMEDIAL, CATEGORY_PSYCHOSOCIAL, "İPbİ - İntihar"))
    } else if topic.starts_with("İPbT") {
        Some(fixed(
            SERVICE_REMEDIAL,
            CATEGORY_PSYCHOSOCIAL,
            "İPbT - Koruyucu ve Destekleyici Tedbir",
        ))
    } else if topic.starts_with("İS") {
        Some(by_topic(SERVICE_REMEDIAL, "İS - Sevk (Yönlendirme)"))
    } else if topic.starts_with("DMÖG") {
        Some(fixed(SERVICE_SUPPORT, CATEGORY_CONSULTING, "DMÖ - Öğretmene Yönelik"))
    } else if topic.starts_with("DMVG") {
        Some(fixed(SERVICE_SUPPORT, CATEGORY_CONSULTING, "DMV - Veliye Yönelik"))
    } else {
        None
    };

    if let Some((service, category, area)) = picked {
        out.service_type = service;
        out.work_category = category;
        out.work_area = area;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonKind {
    Student,
    Parent,
    Group,
    Staff,
    Other,
}

impl PersonKind {
    pub fn of(person: &str) -> Self {
        match person.trim() {
            "Öğrenci" => Self::Student,
            "Veli" | "Anne" | "Baba" | "Vasi" => Self::Parent,
            "Sınıf" | "Grup" => Self::Group,
            "Personel" => Self::Staff,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindCounts {
    pub total: usize,
    pub student: usize,
    pub parent: usize,
    pub group: usize,
    pub staff: usize,
}

impl KindCounts {
    pub fn add(&mut self, kind: PersonKind) {
        self.total += 1;
        match kind {
            PersonKind::Student => self.student += 1,
            PersonKind::Parent => self.parent += 1,
            PersonKind::Group => self.group += 1,
            PersonKind::Staff => self.staff += 1,
            PersonKind::Other => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeetingKey {
    pub id: String,
    pub student_id: Option<String>,
    pub date: String,
    pub created_at: String,
}

/// Session numbers per student in chronological order (date, then creation
/// time). Meetings without a student keep session 1.
pub fn session_numbers(meetings: &[MeetingKey]) -> HashMap<String, i64> {
    let mut sorted: Vec<&MeetingKey> = meetings.iter().collect();
    sorted.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen: HashMap<&str, i64> = HashMap::new();
    let mut out = HashMap::with_capacity(meetings.len());
    for m in sorted {
        let n = match m.student_id.as_deref() {
            Some(sid) => {
                let c = seen.entry(sid).or_insert(0);
                *c += 1;
                *c
            }
            None => 1,
        };
        out.insert(m.id.clone(), n);
    }
    out
}
