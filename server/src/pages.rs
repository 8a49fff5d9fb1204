//! Server-rendered HTML pages.
//!
//! Every value that came from a user, the directory or the meeting record is
//! passed through [`escape_html`] before it is interpolated.

use std::{fmt::Write as _, path::Path};

use products_directory::{CacheStats, EmployeeRecord, Lookup};
use products_meeting::MeetingDetails;

const STYLE: &str = "body{font-family:sans-serif;max-width:40rem;margin:2rem auto;padding:0 1rem}\
label{display:block;margin-top:.75rem}input{width:100%;padding:.4rem}\
button{margin-top:1rem;padding:.5rem 1.5rem}.error{color:#b00020}.ok{color:#1b5e20}\
.debug{background:#fff8e1;border:1px solid #ffb300;padding:.5rem;font-size:.85rem}\
table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:.3rem .6rem;text-align:left}";

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"th\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = escape_html(title),
    )
}

fn error_line(message: Option<&str>) -> String {
    message
        .map(|message| format!("<p class=\"error\">{}</p>\n", escape_html(message)))
        .unwrap_or_default()
}

fn timing_banner(timing: Option<&Lookup>) -> String {
    let Some(lookup) = timing else {
        return String::new();
    };
    format!(
        "<div class=\"debug\">โหลดข้อมูล {load:.2} ms ({tier}) · ค้นหา {search:.2} ms · จำนวนพนักงาน {size}</div>\n",
        load = lookup.load_time.as_secs_f64() * 1000.0,
        search = lookup.search_time.as_secs_f64() * 1000.0,
        tier = lookup.tier.as_str(),
        size = lookup.directory_size,
    )
}

pub fn landing(meeting: Option<&MeetingDetails>, error: Option<&str>) -> String {
    let mut body = String::from("<h1>แบบฟอร์มลงทะเบียนการประชุม</h1>\n");
    match meeting {
        Some(details) => {
            let _ = write!(
                body,
                "<section>\n<p><strong>หัวข้อการประชุม:</strong> {topic}</p>\n\
                 <p><strong>วันที่:</strong> {date}</p>\n\
                 <p><strong>เวลา:</strong> {start} - {end} น.</p>\n\
                 <p><strong>สถานที่:</strong> ห้องประชุม {room} ชั้น {floor} อาคาร {building}</p>\n</section>\n",
                topic = escape_html(&details.topic),
                date = escape_html(&details.date),
                start = escape_html(&details.start_time),
                end = escape_html(&details.end_time),
                room = escape_html(&details.room),
                floor = escape_html(&details.floor),
                building = escape_html(&details.building),
            );
        }
        None => body.push_str("<p class=\"error\">ไม่พบข้อมูลการประชุม</p>\n"),
    }
    body.push_str(&error_line(error));
    body.push_str(
        "<form method=\"post\" action=\"/register\">\n\
         <label for=\"emp_id\">รหัสพนักงาน (ไม่ต้องใส่ 0 ด้านหน้า)</label>\n\
         <input id=\"emp_id\" name=\"emp_id\" inputmode=\"numeric\" autofocus required>\n\
         <button type=\"submit\">ลงทะเบียน</button>\n</form>\n",
    );
    layout("ลงทะเบียนการประชุม", &body)
}

fn record_table(record: &EmployeeRecord) -> String {
    let rows = [
        ("รหัสพนักงาน", &record.id),
        ("ชื่อ - นามสกุล", &record.name),
        ("ตำแหน่ง", &record.job_title),
        ("ส่วนงานย่อ", &record.unit_short),
        ("ชื่อศูนย์ต้นทุน", &record.unit_full),
    ];
    let mut table = String::from("<table>\n");
    for (label, value) in rows {
        let shown = if value.is_empty() { "ไม่ระบุ" } else { value.as_str() };
        let _ = writeln!(
            table,
            "<tr><th>{label}</th><td>{}</td></tr>",
            escape_html(shown)
        );
    }
    table.push_str("</table>\n");
    table
}

pub fn registered(record: &EmployeeRecord, manual: bool, timing: Option<&Lookup>) -> String {
    let heading = if manual {
        "ลงทะเบียนด้วยตนเองสำเร็จ"
    } else {
        "ลงทะเบียนสำเร็จ"
    };
    let body = format!(
        "{banner}<h1 class=\"ok\">{heading}</h1>\n<p>ข้อมูลของคุณได้ถูกบันทึกเรียบร้อยแล้ว</p>\n\
         {table}<p><a href=\"/\">กลับหน้าแรก</a></p>\n",
        banner = timing_banner(timing),
        table = record_table(record),
    );
    layout(heading, &body)
}

fn manual_form(prefill_id: &str) -> String {
    format!(
        "<h2>กรอกข้อมูลด้วยตนเอง</h2>\n<form method=\"post\" action=\"/register_manual\">\n\
         <label for=\"new_emp_id\">รหัสพนักงาน</label>\n\
         <input id=\"new_emp_id\" name=\"new_emp_id\" value=\"{id}\" required>\n\
         <label for=\"new_emp_name\">ชื่อ - นามสกุล</label>\n\
         <input id=\"new_emp_name\" name=\"new_emp_name\" required>\n\
         <label for=\"new_position\">ตำแหน่ง</label>\n<input id=\"new_position\" name=\"new_position\">\n\
         <label for=\"new_sec_short\">ส่วนงานย่อ</label>\n<input id=\"new_sec_short\" name=\"new_sec_short\">\n\
         <label for=\"new_cc_name\">ชื่อศูนย์ต้นทุน</label>\n<input id=\"new_cc_name\" name=\"new_cc_name\">\n\
         <button type=\"submit\">ลงทะเบียน</button>\n</form>\n",
        id = escape_html(prefill_id),
    )
}

/// Lookup missed or was rejected; offer manual entry with the typed id.
pub fn lookup_miss(raw_id: &str, message: &str, timing: Option<&Lookup>) -> String {
    let body = format!(
        "{banner}<h1>ผลการลงทะเบียน</h1>\n{error}<p>รหัสที่ค้นหา: <strong>{id}</strong></p>\n\
         <p>กรุณาตรวจสอบรหัสพนักงาน หรือกรอกข้อมูลด้วยตนเองด้านล่าง</p>\n{form}\
         <p><a href=\"/\">ย้อนกลับ</a></p>\n",
        banner = timing_banner(timing),
        error = error_line(Some(message)),
        id = escape_html(raw_id),
        form = manual_form(raw_id),
    );
    layout("ไม่พบข้อมูล", &body)
}

pub fn directory_unavailable(raw_id: &str) -> String {
    let body = format!(
        "<h1>เกิดข้อผิดพลาด</h1>\n<p class=\"error\">ไม่สามารถอ่านข้อมูลพนักงานได้ในขณะนี้</p>\n\
         {form}<p><a href=\"/\">กลับหน้าแรก</a></p>\n",
        form = manual_form(raw_id),
    );
    layout("ระบบข้อมูลพนักงานไม่พร้อมใช้งาน", &body)
}

pub fn manual_notice() -> String {
    layout(
        "ไม่พบข้อมูล",
        "<h1>ไม่พบข้อมูล</h1>\n<p>กรุณากลับไปที่หน้าลงทะเบียนหลัก</p>\n<p><a href=\"/\">กลับหน้าแรก</a></p>\n",
    )
}

pub fn manual_rejected(errors: &[String]) -> String {
    let mut body = String::from("<h1 class=\"error\">เกิดข้อผิดพลาด</h1>\n<ul>\n");
    for error in errors {
        let _ = writeln!(body, "<li class=\"error\">{}</li>", escape_html(error));
    }
    body.push_str("</ul>\n<p><a href=\"javascript:history.back()\">ย้อนกลับไปแก้ไข</a></p>\n");
    layout("เกิดข้อผิดพลาด", &body)
}

pub fn login(username: &str, error: Option<&str>) -> String {
    let body = format!(
        "<h1>เข้าสู่ระบบผู้ดูแล</h1>\n{error}<form method=\"post\" action=\"/admin/login\">\n\
         <label for=\"username\">ชื่อผู้ใช้</label>\n\
         <input id=\"username\" name=\"username\" value=\"{user}\" autocomplete=\"username\" required>\n\
         <label for=\"password\">รหัสผ่าน</label>\n\
         <input id=\"password\" name=\"password\" type=\"password\" autocomplete=\"current-password\" required>\n\
         <button type=\"submit\">เข้าสู่ระบบ</button>\n</form>\n",
        error = error_line(error),
        user = escape_html(username),
    );
    layout("เข้าสู่ระบบผู้ดูแล", &body)
}

/// Outcome line shown above the meeting editor.
#[derive(Clone, Copy, Debug)]
pub enum Notice<'a> {
    Saved,
    Error(&'a str),
}

pub fn meeting_editor(user: &str, details: &MeetingDetails, notice: Option<Notice<'_>>) -> String {
    let notice = match notice {
        Some(Notice::Saved) => "<p class=\"ok\">บันทึกข้อมูลสำเร็จ</p>\n".to_string(),
        Some(Notice::Error(message)) => error_line(Some(message)),
        None => String::new(),
    };
    let fields = [
        ("topic", "หัวข้อการประชุม", &details.topic, true),
        ("date", "วันที่ (เช่น 15 กรกฎาคม 2568)", &details.date, true),
        ("start_time", "เวลาเริ่ม", &details.start_time, true),
        ("end_time", "เวลาสิ้นสุด", &details.end_time, true),
        ("room", "ห้อง", &details.room, false),
        ("floor", "ชั้น", &details.floor, false),
        ("building", "อาคาร (เช่น อาคารสำนักงานใหญ่)", &details.building, false),
    ];
    let mut inputs = String::new();
    for (name, label, value, required) in fields {
        let _ = write!(
            inputs,
            "<label for=\"{name}\">{label}</label>\n<input id=\"{name}\" name=\"{name}\" value=\"{value}\"{required}>\n",
            value = escape_html(value),
            required = if required { " required" } else { "" },
        );
    }
    let body = format!(
        "<p>ผู้ใช้: {user} · <a href=\"/admin/cache\">สถานะแคช</a> · <a href=\"/admin/logout\">ออกจากระบบ</a></p>\n\
         <h1>แก้ไขรายละเอียดการประชุม</h1>\n{notice}\
         <form method=\"post\" action=\"/admin/detail\">\n{inputs}<button type=\"submit\">บันทึก</button>\n</form>\n",
        user = escape_html(user),
    );
    layout("แก้ไขรายละเอียดการประชุม", &body)
}

pub fn cache_status(stats: &CacheStats, source: &Path, snapshot: &Path) -> String {
    let memory = match stats.records {
        Some(count) => format!("มีข้อมูลพนักงานอยู่ในแคช {count} รายการ"),
        None => "ยังไม่มีข้อมูลพนักงานในแคช".to_string(),
    };
    let body = format!(
        "<p><a href=\"/admin/detail\">กลับไปหน้าแก้ไขการประชุม</a></p>\n\
         <h1>สถานะแคชข้อมูลพนักงาน</h1>\n<p>{memory}</p>\n<table>\n\
         <tr><th>ไฟล์ต้นทาง</th><td>{source}</td></tr>\n\
         <tr><th>ไฟล์แคช</th><td>{snapshot} ({present})</td></tr>\n\
         <tr><th>ดึงจากหน่วยความจำ</th><td>{memory_hits}</td></tr>\n\
         <tr><th>ดึงจากไฟล์แคช</th><td>{snapshot_hits}</td></tr>\n\
         <tr><th>อ่านไฟล์ต้นทางใหม่</th><td>{rebuilds}</td></tr>\n\
         <tr><th>ล้มเหลว</th><td>{failures}</td></tr>\n</table>\n\
         <form method=\"post\" action=\"/admin/cache/clear\">\n<button type=\"submit\">ล้างแคชทั้งหมด</button>\n</form>\n",
        source = escape_html(&source.display().to_string()),
        snapshot = escape_html(&snapshot.display().to_string()),
        present = if stats.snapshot_present { "มี" } else { "ไม่มี" },
        memory_hits = stats.memory_hits,
        snapshot_hits = stats.snapshot_hits,
        rebuilds = stats.rebuilds,
        failures = stats.failures,
    );
    layout("สถานะแคชข้อมูลพนักงาน", &body)
}
