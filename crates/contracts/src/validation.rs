use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Arabic field labels used as keys in validation responses.
pub mod labels {
    pub const STUDENT_NAME: &str = "اسم الطالب";
    pub const STUDENT_ID: &str = "رقم الطالب";
    pub const SEQ_IN_COLLEGE: &str = "التسلسل في الكلية";
    pub const STAGE: &str = "المرحلة";
    pub const STATE: &str = "الوضع";
    pub const ACADEMIC_YEAR: &str = "السنة الاكاديمية";
    pub const USER: &str = "المستخدم";
    pub const USERNAME: &str = "اسم المستخدم";
    pub const PASSWORD: &str = "كلمة المرور";
    pub const TABLE: &str = "الجدول";
    pub const SUBJECT: &str = "المادة";
    pub const SUBJECT_ID: &str = "رقم المادة";
    pub const SUBJECT_NAME: &str = "اسم المادة";
    pub const SUBJECT_NAME_ENGLISH: &str = "اسم المادة بالانكليزي";
    pub const SEMESTER: &str = "الفصل";
    pub const DEPARTMENT: &str = "القسم";
    pub const MAX_THEORY_MARK: &str = "الدرجة النظرية العليا";
    pub const MAX_LAB_MARK: &str = "درجة العملي العليا";
    pub const MAX_SEMESTER_MARK: &str = "درجة السعي العليا";
    pub const MAX_FINAL_EXAM: &str = "درجة الامتحان النهائي العليا";
    pub const CREDITS: &str = "الوحدات";
    pub const ACTIVE: &str = "فعالة";
    pub const MINISTERIAL: &str = "وزارية";
    pub const SEMESTER_MARK: &str = "السعي";
    pub const FINAL_MARK: &str = "درجة الامتحان النهائي";
}

/// Arabic validation messages.
pub mod messages {
    pub const REQUIRED: &str = "يجب تزويد المعلومات";
    pub const INVALID_STAGE: &str = "المرحلة غير صحيحة";
    pub const INVALID_YEAR: &str = "السنة الاكاديمية غير صحيحة";
    pub const YEAR_MISMATCH: &str = "السنة الاكاديمية لا تطابق الجدول";
    pub const UNKNOWN_TABLE: &str = "الجدول غير موجود";
    pub const NOT_POSITIVE: &str = "يجب ان تكون القيمة اكبر من صفر";
    pub const NEGATIVE: &str = "لا يمكن ان تكون القيمة سالبة";
    pub const ABOVE_MAX: &str = "الدرجة اعلى من الحد الاعلى للمادة";
    pub const YES_NO: &str = "يجب ان تكون القيمة نعم او لا";
    pub const TOO_LONG: &str = "القيمة طويلة جدا";
    pub const NOT_FOUND: &str = "السجل غير موجود";
    pub const YEAR_EXISTS: &str = "السنة الاكاديمية موجودة مسبقا";
}

/// Per-field validation failures. Only the first message per field is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Records `message` against `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn require_text(&mut self, value: &str, field: &str) {
        self.check(!value.trim().is_empty(), field, messages::REQUIRED);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}
